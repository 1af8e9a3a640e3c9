use nalgebra::Vector4;
use opencv::core::Rect;

mod kalman_filter;
mod object_tracker;
mod track;

pub use object_tracker::ObjectTracker;
pub use track::{Track, TrackId};

/// A single detector output for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: Rect,
    pub class_id: u32,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: Rect, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }

    /// Creates a detection from corner coordinates `x1, y1, x2, y2`.
    pub fn from_corners(corners: [i32; 4], class_id: u32, confidence: f32) -> Self {
        let [x1, y1, x2, y2] = corners;
        Self::new(Rect::new(x1, y1, x2 - x1, y2 - y1), class_id, confidence)
    }

    fn tlwh(&self) -> [f32; 4] {
        rect_to_tlwh(self.bbox)
    }
}

fn rect_to_tlwh(rect: Rect) -> [f32; 4] {
    [
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
    ]
}

fn tlwh_to_rect(tlwh: [f32; 4]) -> Rect {
    Rect::new(
        tlwh[0].round() as i32,
        tlwh[1].round() as i32,
        tlwh[2].round() as i32,
        tlwh[3].round() as i32,
    )
}

fn tlwh_to_xyah(tlwh: [f32; 4]) -> Vector4<f32> {
    let cx = tlwh[0] + tlwh[2] / 2.0;
    let cy = tlwh[1] + tlwh[3] / 2.0;
    let a = tlwh[2] / tlwh[3];
    let h = tlwh[3];
    Vector4::new(cx, cy, a, h)
}

fn iou_tlwh(a: [f32; 4], b: [f32; 4]) -> f32 {
    let ax1 = a[0];
    let ay1 = a[1];
    let ax2 = a[0] + a[2];
    let ay2 = a[1] + a[3];

    let bx1 = b[0];
    let by1 = b[1];
    let bx2 = b[0] + b[2];
    let by2 = b[1] + b[3];

    let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a[2].max(0.0) * a[3].max(0.0);
    let area_b = b[2].max(0.0) * b[3].max(0.0);

    inter_area / (area_a + area_b - inter_area + 1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_identical_and_disjoint() {
        let a = [0.0, 0.0, 10.0, 10.0];

        assert!((iou_tlwh(a, a) - 1.0).abs() < 1e-4);
        assert_eq!(iou_tlwh(a, [20.0, 20.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let iou = iou_tlwh([0.0, 0.0, 10.0, 10.0], [5.0, 0.0, 10.0, 10.0]);

        assert!((iou - 50.0 / 150.0).abs() < 1e-4);
    }

    #[test]
    fn from_corners_builds_rect() {
        let detection = Detection::from_corners([10, 20, 50, 80], 2, 0.9);

        assert_eq!(detection.bbox, Rect::new(10, 20, 40, 60));
    }
}
