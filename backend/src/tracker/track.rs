use opencv::core::{Point, Rect};

use super::{
    Detection, kalman_filter::KalmanXYAH, rect_to_tlwh, tlwh_to_rect, tlwh_to_xyah,
};

/// The identity of a [`Track`], unique for the lifetime of an [`super::ObjectTracker`].
pub type TrackId = u64;

/// A persistent identity for a detected object.
#[derive(Debug, Clone)]
pub struct Track {
    pub(super) id: TrackId,
    pub(super) class_id: u32,
    pub(super) misses: u32,
    hits: u32,
    kalman: KalmanXYAH,
    tlwh: [f32; 4],
}

impl Track {
    pub(super) fn new(id: TrackId, detection: &Detection) -> Self {
        let tlwh = detection.tlwh();

        Self {
            id,
            class_id: detection.class_id,
            misses: 0,
            hits: 1,
            kalman: KalmanXYAH::new(tlwh_to_xyah(tlwh)),
            tlwh,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    /// The class id of the last detection matched to this track.
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    /// Number of consecutive frames this track went unmatched.
    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Number of frames this track was matched, including the one that created it.
    pub fn hits(&self) -> u32 {
        self.hits
    }

    /// Whether this track was matched to a detection in the latest update.
    pub fn is_matched(&self) -> bool {
        self.misses == 0
    }

    /// The last matched bounding box.
    pub fn rect(&self) -> Rect {
        tlwh_to_rect(self.tlwh)
    }

    /// The center of [`Self::rect`].
    pub fn centroid(&self) -> Point {
        let rect = self.rect();
        Point::new(rect.x + rect.width / 2, rect.y + rect.height / 2)
    }

    /// The bounding box the motion model expects for the current frame.
    pub fn predicted_rect(&self) -> Rect {
        tlwh_to_rect(self.kalman.tlwh())
    }

    pub(super) fn predicted_tlwh(&self) -> [f32; 4] {
        self.kalman.tlwh()
    }

    pub(super) fn predict(&mut self) {
        // Keeps a shrinking box from collapsing through zero height
        if self.kalman.mean[7] + self.kalman.mean[3] <= 0.0 {
            self.kalman.mean[7] = 0.0;
        }
        self.kalman.predict();
    }

    pub(super) fn update(&mut self, detection: &Detection) {
        self.tlwh = rect_to_tlwh(detection.bbox);
        self.class_id = detection.class_id;
        self.misses = 0;
        self.hits += 1;
        self.kalman.update(tlwh_to_xyah(self.tlwh));
    }

    pub(super) fn mark_missed(&mut self) {
        self.misses += 1;
    }
}
