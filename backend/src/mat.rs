use anyhow::{Result, bail};
use base64::{Engine, prelude::BASE64_STANDARD};
use opencv::{
    boxed_ref::BoxedRef,
    core::{CV_8UC3, Mat, MatTraitConst, MatTraitConstManual, ToInputArray, Vec3b, Vector},
    imgcodecs::imencode_def,
    imgproc::{COLOR_BGR2GRAY, cvt_color_def},
};

/// A raw BGR frame as produced by a camera.
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: i32,
    pub height: i32,
    /// Tightly packed BGR bytes, `width * height * 3` long.
    pub data: Vec<u8>,
}

/// A [`Mat`] that owns the external buffer.
#[derive(Debug)]
pub struct OwnedMat {
    rows: i32,
    cols: i32,
    bytes: Vec<u8>,
}

impl OwnedMat {
    #[inline]
    pub fn new(frame: Frame) -> Result<Self> {
        if frame.width <= 0 || frame.height <= 0 {
            bail!("invalid frame size {}x{}", frame.width, frame.height);
        }
        let len = (frame.width as usize)
            .checked_mul(frame.height as usize)
            .and_then(|pixels| pixels.checked_mul(3));
        if len != Some(frame.data.len()) {
            bail!(
                "frame buffer of {} bytes does not match {}x{} BGR",
                frame.data.len(),
                frame.width,
                frame.height
            );
        }

        let owned = Self {
            rows: frame.height,
            cols: frame.width,
            bytes: frame.data,
        };
        let _ = owned.as_mat()?;

        Ok(owned)
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.cols
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.rows
    }

    pub fn as_mat(&self) -> Result<BoxedRef<'_, Mat>> {
        Ok(Mat::new_rows_cols_with_bytes::<Vec3b>(
            self.rows,
            self.cols,
            &self.bytes,
        )?)
    }

    /// Copies the frame into a standalone [`Mat`] that can be drawn on.
    pub fn to_mat(&self) -> Result<Mat> {
        Ok(self.as_mat()?.try_clone()?)
    }

    /// Converts the frame to a single channel luminance [`Mat`].
    pub fn to_grayscale(&self) -> Result<Mat> {
        let mut gray = Mat::default();
        cvt_color_def(&self.as_mat()?, &mut gray, COLOR_BGR2GRAY)?;
        Ok(gray)
    }
}

impl TryFrom<Mat> for Frame {
    type Error = anyhow::Error;

    fn try_from(value: Mat) -> Result<Self> {
        if value.typ() != CV_8UC3 {
            bail!("expected a BGR mat but got type {}", value.typ());
        }
        let value = if value.is_continuous() {
            value
        } else {
            value.try_clone()?
        };

        Ok(Frame {
            width: value.cols(),
            height: value.rows(),
            data: value.data_bytes()?.to_vec(),
        })
    }
}

impl TryFrom<Mat> for OwnedMat {
    type Error = anyhow::Error;

    fn try_from(value: Mat) -> Result<Self> {
        Self::new(Frame::try_from(value)?)
    }
}

/// Encodes `mat` to JPEG and then to `base64`.
pub fn to_jpeg_base64(mat: &impl ToInputArray) -> Result<String> {
    let mut bytes = Vector::<u8>::new();
    imencode_def(".jpg", mat, &mut bytes)?;
    Ok(BASE64_STANDARD.encode(bytes.as_slice()))
}
