use anyhow::Result;
use opencv::{
    core::{Mat, Point, Scalar},
    imgproc::{FONT_HERSHEY_SIMPLEX, LINE_8, line, put_text, rectangle},
};

use crate::{direction::Line, mat::OwnedMat, tracker::Track};

const LINE_COLOR: Scalar = Scalar::new(255.0, 0.0, 0.0, 0.0);
const TRACK_COLOR: Scalar = Scalar::new(0.0, 255.0, 0.0, 0.0);

/// Draws the reference lines and the tracks' boxes and ids on a copy of `frame`.
pub fn annotate(frame: &OwnedMat, lines: &[Line], tracks: &[Track]) -> Result<Mat> {
    let mut mat = frame.to_mat()?;

    for reference in lines {
        line(
            &mut mat,
            Point::new(reference.x1 as i32, reference.y1 as i32),
            Point::new(reference.x2 as i32, reference.y2 as i32),
            LINE_COLOR,
            2,
            LINE_8,
            0,
        )?;
    }
    for track in tracks {
        let rect = track.rect();
        rectangle(&mut mat, rect, TRACK_COLOR, 2, LINE_8, 0)?;
        put_text(
            &mut mat,
            &format!("ID:{}", track.id()),
            Point::new(rect.x, rect.y - 5),
            FONT_HERSHEY_SIMPLEX,
            0.6,
            TRACK_COLOR,
            2,
            LINE_8,
            false,
        )?;
    }

    Ok(mat)
}

#[cfg(test)]
mod tests {
    use opencv::core::{MatTraitConst, MatTraitConstManual, Vec3b};

    use super::*;
    use crate::{
        mat::Frame,
        tracker::{Detection, ObjectTracker},
    };

    fn black_frame() -> OwnedMat {
        OwnedMat::new(Frame {
            width: 64,
            height: 48,
            data: vec![0; 64 * 48 * 3],
        })
        .unwrap()
    }

    #[test]
    fn annotate_draws_on_a_copy() {
        let frame = black_frame();
        let mut tracker = ObjectTracker::new(0.3, 1);
        let tracks = tracker.update(&[Detection::from_corners([10, 20, 30, 40], 2, 0.9)]);

        let annotated = annotate(&frame, &[Line::horizontal(45.0, 64.0)], &tracks).unwrap();

        let pixels = annotated.data_typed::<Vec3b>().unwrap();
        // Row 45 is blue, the box left edge at row 30 is green
        assert_eq!(pixels[45 * 64 + 50], Vec3b::from([255, 0, 0]));
        assert_eq!(pixels[30 * 64 + 10], Vec3b::from([0, 255, 0]));
        assert!(frame.as_mat().unwrap().data_bytes().unwrap().iter().all(|byte| *byte == 0));
        assert_eq!(annotated.rows(), 48);
    }
}
