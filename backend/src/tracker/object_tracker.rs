use log::debug;
use pathfinding::prelude::{Matrix, kuhn_munkres};

use super::{
    Detection, iou_tlwh,
    track::{Track, TrackId},
};

/// Fixed point scale used to turn IoU into integer assignment weights.
const IOU_SCALE: f32 = 1_000_000.0;

/// Associates per-frame detections with persistent track identities.
///
/// Each update predicts every track forward with its own constant velocity model, scores
/// predicted boxes against the new detections by IoU and resolves the pairing with a minimum
/// cost assignment over `1 - IoU`, solved as a maximum total IoU matching. Pairs under the
/// minimum IoU are rejected.
#[derive(Debug)]
pub struct ObjectTracker {
    /// Active tracks ordered by ascending id.
    tracks: Vec<Track>,
    removed: Vec<TrackId>,
    next_id: TrackId,
    frame_id: u64,
    min_iou: f32,
    max_misses: u32,
}

impl ObjectTracker {
    /// Creates a tracker.
    ///
    /// A track survives `max_misses` consecutive unmatched frames and is destroyed on the next.
    pub fn new(min_iou: f32, max_misses: u32) -> Self {
        Self {
            tracks: Vec::new(),
            removed: Vec::new(),
            next_id: 1,
            frame_id: 0,
            min_iou,
            max_misses,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// The currently active tracks ordered by id.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Identities destroyed by the latest [`Self::update`].
    pub fn removed(&self) -> &[TrackId] {
        &self.removed
    }

    /// Advances the tracker by one frame and returns the active tracks ordered by id.
    ///
    /// An empty `detections` ages every track. Returned tracks include those missed in this
    /// frame but not yet destroyed; see [`Track::is_matched`].
    pub fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
        self.frame_id += 1;
        self.removed.clear();

        let detections = detections
            .iter()
            .filter(|detection| {
                let valid = detection.bbox.width > 0 && detection.bbox.height > 0;
                if !valid {
                    debug!(target: "tracker", "ignoring degenerate box {:?}", detection.bbox);
                }
                valid
            })
            .collect::<Vec<_>>();

        // 1. Predict
        for track in &mut self.tracks {
            track.predict();
        }

        // 2. Associate
        let ious = iou_matrix(&self.tracks, &detections);
        let (matches, unmatched_tracks, unmatched_detections) = assign(&ious, self.min_iou);

        // 3. Update matched, age unmatched
        for (ti, di) in matches {
            self.tracks[ti].update(detections[di]);
        }
        for ti in unmatched_tracks {
            self.tracks[ti].mark_missed();
        }

        // 4. Destroy tracks missed for too long
        let max_misses = self.max_misses;
        let removed = &mut self.removed;
        self.tracks.retain(|track| {
            let keep = track.misses <= max_misses;
            if !keep {
                removed.push(track.id);
            }
            keep
        });

        // 5. Spawn tracks from unmatched detections
        for di in unmatched_detections {
            self.tracks.push(Track::new(self.next_id, detections[di]));
            self.next_id += 1;
        }

        self.tracks.clone()
    }
}

fn iou_matrix(tracks: &[Track], detections: &[&Detection]) -> Vec<Vec<f32>> {
    tracks
        .iter()
        .map(|track| {
            let predicted = track.predicted_tlwh();
            detections
                .iter()
                .map(|detection| iou_tlwh(predicted, detection.tlwh()))
                .collect()
        })
        .collect()
}

/// Resolves `ious` into `(matches, unmatched_rows, unmatched_columns)`.
///
/// Matches whose IoU is under `min_iou` are reported as unmatched on both sides. Indices are
/// returned in ascending order.
fn assign(ious: &[Vec<f32>], min_iou: f32) -> (Vec<(usize, usize)>, Vec<usize>, Vec<usize>) {
    let n = ious.len();
    let m = ious.first().map_or(0, Vec::len);
    if n == 0 || m == 0 {
        return (vec![], (0..n).collect(), (0..m).collect());
    }

    // Square so the solver accepts it, padded cells weigh nothing
    let k = n.max(m);
    let mut weights = Matrix::new(k, k, 0_i64);
    for i in 0..n {
        for j in 0..m {
            weights[(i, j)] = (ious[i][j] * IOU_SCALE) as i64;
        }
    }
    let (_, columns) = kuhn_munkres(&weights);

    let mut matches = Vec::new();
    let mut unmatched_rows = Vec::new();
    let mut unmatched_columns = vec![true; m];
    for (i, &j) in columns.iter().take(n).enumerate() {
        if j < m && ious[i][j] >= min_iou {
            matches.push((i, j));
            unmatched_columns[j] = false;
        } else {
            unmatched_rows.push(i);
        }
    }
    let unmatched_columns = unmatched_columns
        .into_iter()
        .enumerate()
        .filter_map(|(j, unmatched)| unmatched.then_some(j))
        .collect();

    (matches, unmatched_rows, unmatched_columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(corners: [i32; 4]) -> Detection {
        Detection::from_corners(corners, 2, 0.9)
    }

    fn ids(tracks: &[Track]) -> Vec<TrackId> {
        tracks.iter().map(Track::id).collect()
    }

    #[test]
    fn update_keeps_identity_for_overlapping_box() {
        let mut tracker = ObjectTracker::new(0.3, 1);

        let first = tracker.update(&[car([100, 100, 150, 150])]);
        let second = tracker.update(&[car([102, 101, 152, 151])]);

        assert_eq!(ids(&first), vec![1]);
        assert_eq!(ids(&second), vec![1]);
        assert!(second[0].is_matched());
        assert_eq!(second[0].hits(), 2);
    }

    #[test]
    fn update_spawns_identity_for_disjoint_box() {
        let mut tracker = ObjectTracker::new(0.3, 1);

        tracker.update(&[car([100, 100, 150, 150])]);
        let tracks = tracker.update(&[car([100, 100, 150, 150]), car([400, 400, 450, 450])]);

        assert_eq!(ids(&tracks), vec![1, 2]);
        assert_eq!(tracks[1].rect().x, 400);
    }

    #[test]
    fn update_rejects_pair_below_min_iou() {
        let mut tracker = ObjectTracker::new(0.5, 0);

        tracker.update(&[car([0, 0, 100, 100])]);
        // IoU of 1/3, below 0.5
        let tracks = tracker.update(&[car([50, 0, 150, 100])]);

        assert_eq!(ids(&tracks), vec![2]);
        assert_eq!(tracker.removed(), &[1]);
    }

    #[test]
    fn update_destroys_track_exactly_after_max_misses() {
        let mut tracker = ObjectTracker::new(0.3, 2);
        tracker.update(&[car([10, 10, 60, 60])]);

        let tracks = tracker.update(&[]);
        assert_eq!(ids(&tracks), vec![1]);
        assert_eq!(tracks[0].misses(), 1);
        assert!(!tracks[0].is_matched());

        let tracks = tracker.update(&[]);
        assert_eq!(ids(&tracks), vec![1]);
        assert_eq!(tracks[0].misses(), 2);
        assert!(tracker.removed().is_empty());

        let tracks = tracker.update(&[]);
        assert!(tracks.is_empty());
        assert_eq!(tracker.removed(), &[1]);
    }

    #[test]
    fn update_resets_misses_when_matched_again() {
        let mut tracker = ObjectTracker::new(0.3, 1);
        tracker.update(&[car([10, 10, 60, 60])]);
        tracker.update(&[]);

        let tracks = tracker.update(&[car([10, 10, 60, 60])]);

        assert_eq!(ids(&tracks), vec![1]);
        assert_eq!(tracks[0].misses(), 0);
    }

    #[test]
    fn update_with_nothing_is_not_an_error() {
        let mut tracker = ObjectTracker::new(0.3, 1);

        assert!(tracker.update(&[]).is_empty());
        assert!(tracker.update(&[]).is_empty());
        assert_eq!(tracker.frame_id(), 2);
    }

    #[test]
    fn update_never_reuses_identity() {
        let mut tracker = ObjectTracker::new(0.3, 0);
        tracker.update(&[car([10, 10, 60, 60])]);
        tracker.update(&[]);

        let tracks = tracker.update(&[car([10, 10, 60, 60])]);

        assert_eq!(ids(&tracks), vec![2]);
    }

    #[test]
    fn update_ignores_degenerate_boxes() {
        let mut tracker = ObjectTracker::new(0.3, 1);

        let tracks = tracker.update(&[car([10, 10, 10, 60]), car([10, 10, 60, 60])]);

        assert_eq!(ids(&tracks), vec![1]);
        assert_eq!(tracks[0].rect().width, 50);
    }

    #[test]
    fn update_is_reproducible() {
        let frames = vec![
            vec![car([0, 0, 40, 40]), car([45, 0, 85, 40])],
            vec![car([44, 0, 84, 40]), car([1, 0, 41, 40])],
            vec![car([2, 0, 42, 40])],
            vec![car([2, 0, 42, 40]), car([46, 0, 86, 40]), car([300, 300, 340, 340])],
        ];
        let run = || {
            let mut tracker = ObjectTracker::new(0.3, 1);
            frames
                .iter()
                .map(|detections| {
                    tracker
                        .update(detections)
                        .into_iter()
                        .map(|track| (track.id(), track.rect().x))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };

        let first = run();
        assert_eq!(first, run());
        assert_eq!(first[1], vec![(1, 1), (2, 44)]);
    }

    #[test]
    fn assign_maximizes_total_iou() {
        // Row 0 alone prefers column 0, but giving it column 1 frees column 0 for row 1
        let ious = vec![vec![0.6, 0.5], vec![0.55, 0.0]];

        let (matches, unmatched_rows, unmatched_columns) = assign(&ious, 0.3);

        assert_eq!(matches, vec![(0, 1), (1, 0)]);
        assert!(unmatched_rows.is_empty());
        assert!(unmatched_columns.is_empty());
    }

    #[test]
    fn assign_rejects_below_threshold() {
        let ious = vec![vec![0.9, 0.0, 0.0], vec![0.0, 0.1, 0.0]];

        let (matches, unmatched_rows, unmatched_columns) = assign(&ious, 0.3);

        assert_eq!(matches, vec![(0, 0)]);
        assert_eq!(unmatched_rows, vec![1]);
        assert_eq!(unmatched_columns, vec![1, 2]);
    }
}
