use std::collections::{BTreeSet, HashSet};

use log::info;

use crate::{
    direction::{DirectionClassifier, Line},
    event_log::CrossingEvent,
    history::TrackHistory,
    models::Settings,
    tracker::{Detection, ObjectTracker, Track, TrackId},
};

const UNKNOWN_VEHICLE: &str = "unknown";

/// Turns per-frame detections into at most one crossing event per track.
#[derive(Debug)]
pub struct CountingPipeline {
    tracker: ObjectTracker,
    history: TrackHistory,
    classifier: DirectionClassifier,
    /// Live identities that already produced an event.
    emitted: HashSet<TrackId>,
    vehicle_classes: BTreeSet<u32>,
    min_confidence: f32,
    tracks: Vec<Track>,
}

impl CountingPipeline {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tracker: ObjectTracker::new(settings.tracker_min_iou, settings.tracker_max_misses),
            history: TrackHistory::new(settings.effective_history_capacity()),
            classifier: DirectionClassifier::new(
                settings.direction_samples,
                settings.direction_axis,
            ),
            emitted: HashSet::new(),
            vehicle_classes: settings.vehicle_classes.clone(),
            min_confidence: settings.min_confidence,
            tracks: vec![],
        }
    }

    /// The tracks produced by the latest [`Self::process`].
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn history(&self) -> &TrackHistory {
        &self.history
    }

    /// Advances tracking by one frame and returns the crossings it completed.
    pub fn process(
        &mut self,
        detections: Vec<Detection>,
        lines: &[Line],
        class_name: impl Fn(u32) -> Option<&'static str>,
    ) -> Vec<CrossingEvent> {
        let detections = detections
            .into_iter()
            .filter(|detection| {
                self.vehicle_classes.contains(&detection.class_id)
                    && detection.confidence >= self.min_confidence
            })
            .collect::<Vec<_>>();
        self.tracks = self.tracker.update(&detections);

        for id in self.tracker.removed() {
            self.history.remove(*id);
            self.emitted.remove(id);
        }

        let mut events = vec![];
        for track in self.tracks.iter().filter(|track| track.is_matched()) {
            let id = track.id();
            if self.emitted.contains(&id) {
                continue;
            }
            self.history.append(id, track.centroid());

            let Some(direction) = self
                .history
                .samples(id)
                .and_then(|samples| self.classifier.classify(lines, samples))
            else {
                continue;
            };
            let vehicle = class_name(track.class_id()).unwrap_or(UNKNOWN_VEHICLE);
            info!(target: "counter", "track {id} ({vehicle}) crossed {direction}");

            self.history.clear(id);
            self.emitted.insert(id);
            events.push(CrossingEvent::new(id, direction, vehicle));
        }

        events
    }
}
