use anyhow::Result;
use log::debug;
use opencv::{
    core::{
        CV_8UC1, Mat, MatExprTraitConst, MatTraitConst, Point, Scalar, ToInputArray, Vector,
        count_non_zero, mean,
    },
    imgproc::fill_poly_def,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct SlotPoint {
    pub x: f32,
    pub y: f32,
}

impl SlotPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SlotStatus {
    Occupied,
    Vacant,
}

/// A parking slot polygon.
///
/// `status` is only ever filled in by [`evaluate_occupancy`] and is never persisted.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Slot {
    #[serde(default)]
    pub points: Vec<SlotPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SlotStatus>,
}

impl Slot {
    pub fn new(points: Vec<SlotPoint>) -> Self {
        Self {
            points,
            status: None,
        }
    }

    pub fn is_polygon(&self) -> bool {
        self.points.len() >= 3
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize)]
pub struct OccupancySummary {
    pub occupied: usize,
    pub vacant: usize,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize)]
pub struct Occupancy {
    /// The evaluated slots, malformed ones excluded.
    pub slots: Vec<Slot>,
    pub summary: OccupancySummary,
}

/// Classifies each slot of `slots` against the single channel `gray` frame.
///
/// A slot is occupied when the mean intensity under its polygon is below `threshold`. Slots
/// with fewer than three points or whose polygon covers no pixel of the frame are skipped.
pub fn evaluate_occupancy<T: ToInputArray + MatTraitConst>(
    gray: &T,
    slots: &[Slot],
    threshold: f64,
) -> Result<Occupancy> {
    let mut occupancy = Occupancy::default();

    for slot in slots {
        if !slot.is_polygon() {
            debug!(target: "occupancy", "skipping slot with {} points", slot.points.len());
            continue;
        }

        let polygon = slot
            .points
            .iter()
            .map(|point| Point::new(point.x as i32, point.y as i32))
            .collect::<Vector<Point>>();
        let mut mask = Mat::zeros(gray.rows(), gray.cols(), CV_8UC1)?.to_mat()?;
        fill_poly_def(
            &mut mask,
            &Vector::<Vector<Point>>::from_iter([polygon]),
            Scalar::all(255.0),
        )?;
        if count_non_zero(&mask)? == 0 {
            debug!(target: "occupancy", "skipping slot outside of frame {:?}", slot.points);
            continue;
        }

        let intensity = mean(gray, &mask)?[0];
        let status = if intensity < threshold {
            occupancy.summary.occupied += 1;
            SlotStatus::Occupied
        } else {
            occupancy.summary.vacant += 1;
            SlotStatus::Vacant
        };
        occupancy.slots.push(Slot {
            points: slot.points.clone(),
            status: Some(status),
        });
    }

    Ok(occupancy)
}
