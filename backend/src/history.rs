use std::collections::{BTreeMap, VecDeque};

use opencv::core::Point;

use crate::tracker::TrackId;

/// Bounded per-identity centroid trajectories.
///
/// Identities are allocated in increasing order, so iterating the map by key is iterating in
/// insertion order.
#[derive(Debug)]
pub struct TrackHistory {
    capacity: usize,
    entries: BTreeMap<TrackId, VecDeque<Point>>,
}

impl TrackHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes `centroid` to the trajectory of `id`, dropping the oldest sample once full.
    pub fn append(&mut self, id: TrackId, centroid: Point) {
        let capacity = self.capacity;
        let samples = self
            .entries
            .entry(id)
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        if samples.len() == capacity {
            samples.pop_front();
        }
        samples.push_back(centroid);
    }

    /// Empties the trajectory of `id` while keeping its storage for reuse.
    pub fn clear(&mut self, id: TrackId) {
        if let Some(samples) = self.entries.get_mut(&id) {
            samples.clear();
        }
    }

    /// Drops `id` entirely, used once its track is destroyed.
    pub fn remove(&mut self, id: TrackId) {
        self.entries.remove(&id);
    }

    /// The trajectory of `id` from oldest to newest, empty if none.
    pub fn get(&self, id: TrackId) -> Vec<Point> {
        self.entries
            .get(&id)
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn samples(&self, id: TrackId) -> Option<&VecDeque<Point>> {
        self.entries.get(&id)
    }

    /// Identities with a trajectory entry, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.entries.keys().copied()
    }
}
