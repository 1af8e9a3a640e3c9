use std::{fmt::Debug, path::Path};

use anyhow::{Result, bail};
use log::debug;
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{
        BORDER_CONSTANT, CV_32FC3, Mat, MatTraitConst, MatTraitConstManual, ModifyInplace, Point,
        Rect, Scalar, Size, Vector, copy_make_border, transpose_nd,
    },
    imgproc::{COLOR_BGR2RGB, INTER_LINEAR, cvt_color_def, resize},
};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{Session, SessionInputValue},
    value::TensorRef,
};

use crate::{mat::OwnedMat, tracker::Detection};

/// Input edge of the letterboxed YOLO input.
const YOLO_INPUT_SIZE: f32 = 640.0;

/// Number of values per row of the NMS exported `output0`, `[x1, y1, x2, y2, score, class]`.
const YOLO_ROW_LEN: usize = 6;

const COCO_CLASS_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// An object detector producing boxes in frame coordinates.
#[cfg_attr(test, automock)]
pub trait Detector: Debug + Send + 'static {
    /// Detects objects in the BGR `frame`.
    fn detect(&mut self, frame: &OwnedMat) -> Result<Vec<Detection>>;

    /// The display name of `class_id`.
    fn class_name(&self, class_id: u32) -> Option<&'static str>;
}

/// A YOLO ONNX model exported with NMS, run through onnxruntime.
#[derive(Debug)]
pub struct YoloDetector {
    session: Session,
    min_confidence: f32,
}

impl YoloDetector {
    pub fn new(model: impl AsRef<Path>, min_confidence: f32) -> Result<Self> {
        Ok(Self {
            session: build_session(model.as_ref())?,
            min_confidence,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &OwnedMat) -> Result<Vec<Detection>> {
        let bgr = frame.as_mat()?;
        let size = bgr.size()?;
        let (mat_in, ratio, left, top) = preprocess_for_yolo(&bgr)?;
        let outputs = self.session.run([to_input_value(&mat_in)?])?;
        let Some(output) = outputs.get("output0") else {
            bail!("model has no output0");
        };
        let (shape, values) = output.try_extract_tensor::<f32>()?;
        let row_len = shape.last().copied().unwrap_or_default() as usize;
        if row_len < YOLO_ROW_LEN {
            bail!("unexpected output shape {shape:?}");
        }

        let detections = values
            .chunks_exact(row_len)
            .filter(|pred| pred[4] >= self.min_confidence)
            .map(|pred| {
                let bbox = remap_from_yolo(pred, size, ratio, left, top);
                Detection::new(bbox, pred[5].max(0.0) as u32, pred[4])
            })
            .collect::<Vec<_>>();
        debug!(target: "detector", "{} detections", detections.len());

        Ok(detections)
    }

    fn class_name(&self, class_id: u32) -> Option<&'static str> {
        COCO_CLASS_NAMES.get(class_id as usize).copied()
    }
}

/// Maps a `[x1, y1, x2, y2, ..]` prediction in letterboxed input space back onto a frame of
/// `size`.
#[inline]
fn remap_from_yolo(pred: &[f32], size: Size, ratio: f32, left: i32, top: i32) -> Rect {
    let to_x = |x: f32| ((x - left as f32) / ratio).clamp(0.0, size.width as f32) as i32;
    let to_y = |y: f32| ((y - top as f32) / ratio).clamp(0.0, size.height as f32) as i32;

    Rect::from_points(
        Point::new(to_x(pred[0]), to_y(pred[1])),
        Point::new(to_x(pred[2]), to_y(pred[3])),
    )
}

/// Letterboxes a BGR image into a normalized `f32` RGB square for YOLO.
///
/// Returns `(Mat, ratio, left, top)`, the uniform scale applied and the padding offsets.
fn preprocess_for_yolo(mat: &impl MatTraitConst) -> Result<(Mat, f32, i32, i32)> {
    let mut mat = mat.try_clone()?;
    let size = mat.size()?;
    let ratio = (YOLO_INPUT_SIZE / size.width as f32).min(YOLO_INPUT_SIZE / size.height as f32);

    let w = (size.width as f32 * ratio).round();
    let h = (size.height as f32 * ratio).round();
    let pad_w = (YOLO_INPUT_SIZE - w) / 2.0;
    let pad_h = (YOLO_INPUT_SIZE - h) / 2.0;

    let top = (pad_h - 0.1).round() as i32;
    let bottom = (pad_h + 0.1).round() as i32;
    let left = (pad_w - 0.1).round() as i32;
    let right = (pad_w + 0.1).round() as i32;

    // SAFETY: all of the functions below can be called in place.
    unsafe {
        mat.modify_inplace(|mat, mat_mut| -> opencv::Result<()> {
            cvt_color_def(mat, mat_mut, COLOR_BGR2RGB)
        })?;
        mat.modify_inplace(|mat, mat_mut| {
            resize(
                mat,
                mat_mut,
                Size::new(w as i32, h as i32),
                0.0,
                0.0,
                INTER_LINEAR,
            )
        })?;
        mat.modify_inplace(|mat, mat_mut| {
            copy_make_border(
                mat,
                mat_mut,
                top,
                bottom,
                left,
                right,
                BORDER_CONSTANT,
                Scalar::all(114.0),
            )
        })?;
        mat.modify_inplace(|mat, mat_mut| mat.convert_to(mat_mut, CV_32FC3, 1.0 / 255.0, 0.0))?;
    }

    Ok((mat, ratio, left, top))
}

/// Converts a continuous, normalized `f32` RGB `Mat` to a `[1, 3, H, W]` input value.
fn to_input_value(mat: &impl MatTraitConst) -> Result<SessionInputValue<'_>> {
    let mat = mat.reshape_nd(1, &[1, mat.rows(), mat.cols(), 3])?;
    let mut mat_t = Mat::default();
    transpose_nd(&mat, &Vector::from_slice(&[0, 3, 1, 2]), &mut mat_t)?;
    let shape = mat_t.mat_size();
    let input = (shape.as_slice(), mat_t.data_typed::<f32>()?);
    let tensor = TensorRef::from_array_view(input)?;
    Ok(SessionInputValue::Owned(tensor.clone().into_dyn()))
}

/// Loads the onnxruntime shared library at `path` for the whole process.
///
/// Must be called once before creating a [`YoloDetector`].
pub fn init_onnxruntime(path: &Path) -> Result<()> {
    ort::init_from(path.to_string_lossy()).commit()?;
    Ok(())
}

fn build_session(model: &Path) -> Result<Session> {
    if cfg!(feature = "gpu") {
        Ok(Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().build()])?
            .commit_from_file(model)?)
    } else {
        Ok(Session::builder()?.commit_from_file(model)?)
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC3, MatExprTraitConst};

    use super::*;

    #[test]
    fn remap_from_yolo_undoes_letterbox() {
        // 1280x720 scales by 0.5 into 640x360 with 140 rows of padding on top
        let size = Size::new(1280, 720);
        let pred = [100.0, 190.0, 200.0, 240.0, 0.9, 2.0];

        let rect = remap_from_yolo(&pred, size, 0.5, 0, 140);

        assert_eq!(rect, Rect::new(200, 100, 200, 100));
    }

    #[test]
    fn remap_from_yolo_clamps_to_frame() {
        let rect = remap_from_yolo(&[-50.0, -50.0, 900.0, 900.0], Size::new(640, 640), 1.0, 0, 0);

        assert_eq!(rect, Rect::new(0, 0, 640, 640));
    }

    #[test]
    fn preprocess_for_yolo_letterboxes_to_square() {
        let mat = Mat::zeros(720, 1280, CV_8UC3).unwrap().to_mat().unwrap();

        let (input, ratio, left, top) = preprocess_for_yolo(&mat).unwrap();

        assert_eq!(input.size().unwrap(), Size::new(640, 640));
        assert_eq!(input.typ(), CV_32FC3);
        assert_eq!(ratio, 0.5);
        assert_eq!((left, top), (0, 140));
    }

    #[test]
    fn coco_class_names_cover_vehicles() {
        let names = [2, 3, 5, 7].map(|id| COCO_CLASS_NAMES.get(id).copied());

        assert_eq!(
            names,
            [Some("car"), Some("motorcycle"), Some("bus"), Some("truck")]
        );
    }
}
