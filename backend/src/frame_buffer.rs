use std::sync::{Arc, Mutex};

use crate::mat::OwnedMat;

/// Holds the most recent camera frame.
///
/// A single writer replaces the frame while any number of readers take a cheap [`Arc`] handle
/// to whatever frame is current. The lock only guards the pointer swap, so readers never wait on
/// a detector or a camera and never observe a partially written frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    latest: Mutex<Option<Arc<OwnedMat>>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held frame.
    pub fn write(&self, frame: OwnedMat) {
        let frame = Arc::new(frame);
        *self.latest.lock().unwrap() = Some(frame);
    }

    /// Returns the latest frame or `None` if no frame was ever written.
    pub fn read(&self) -> Option<Arc<OwnedMat>> {
        self.latest.lock().unwrap().clone()
    }
}
