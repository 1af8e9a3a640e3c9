use std::fmt::Debug;

use anyhow::{Result, bail};
use log::info;
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{Mat, MatTraitConst},
    videoio::{
        CAP_ANY, CAP_PROP_BUFFERSIZE, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, VideoCapture,
        VideoCaptureTrait, VideoCaptureTraitConst,
    },
};

use crate::mat::Frame;

/// A source of BGR frames.
///
/// A bridge trait between the camera device and the capture loop.
#[cfg_attr(test, automock)]
pub trait Camera: Debug + Send + 'static {
    /// Reads the next frame, blocking briefly if the device has none ready.
    fn capture_frame(&mut self) -> Result<Frame>;
}

#[derive(Debug)]
pub struct DefaultCamera {
    inner: VideoCapture,
}

impl DefaultCamera {
    /// Opens camera `index` and requests a `width` by `height` capture size.
    pub fn new(index: i32, width: i32, height: i32) -> Result<Self> {
        let mut inner = VideoCapture::new(index, CAP_ANY)?;
        if !inner.is_opened()? {
            bail!("failed to open camera {index}");
        }
        inner.set(CAP_PROP_FRAME_WIDTH, width as f64)?;
        inner.set(CAP_PROP_FRAME_HEIGHT, height as f64)?;
        // Keeps the latest frame close to real time
        inner.set(CAP_PROP_BUFFERSIZE, 1.0)?;
        info!(
            target: "capture",
            "opened camera {index} at {}x{}",
            inner.get(CAP_PROP_FRAME_WIDTH)?,
            inner.get(CAP_PROP_FRAME_HEIGHT)?
        );

        Ok(Self { inner })
    }
}

impl Camera for DefaultCamera {
    fn capture_frame(&mut self) -> Result<Frame> {
        let mut mat = Mat::default();
        if !self.inner.read(&mut mat)? || mat.empty() {
            bail!("camera returned no frame");
        }
        Frame::try_from(mat)
    }
}
