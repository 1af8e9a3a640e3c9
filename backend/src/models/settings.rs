use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::deserialize_with_ok_or_default;
use crate::{
    direction::{Axis, Line},
    impl_identifiable,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip_serializing, default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub camera_index: i32,
    #[serde(default = "capture_width_default")]
    pub capture_width: i32,
    #[serde(default = "capture_height_default")]
    pub capture_height: i32,
    #[serde(default = "model_path_default")]
    pub model_path: String,
    #[serde(default = "min_confidence_default")]
    pub min_confidence: f32,
    /// Detector class ids counted as vehicles.
    #[serde(default = "vehicle_classes_default")]
    pub vehicle_classes: BTreeSet<u32>,
    #[serde(default = "tracker_min_iou_default")]
    pub tracker_min_iou: f32,
    #[serde(default = "tracker_max_misses_default")]
    pub tracker_max_misses: u32,
    #[serde(default = "direction_samples_default")]
    pub direction_samples: usize,
    #[serde(default = "history_capacity_default")]
    pub history_capacity: usize,
    #[serde(default, deserialize_with = "deserialize_with_ok_or_default")]
    pub direction_axis: Axis,
    #[serde(default = "occupancy_threshold_default")]
    pub occupancy_threshold: f64,
    #[serde(default = "loop_interval_millis_default")]
    pub loop_interval_millis: u64,
    #[serde(default = "event_log_path_default")]
    pub event_log_path: String,
    #[serde(default = "layouts_dir_default")]
    pub layouts_dir: String,
    /// Spreadsheet webhook, syncing is disabled when empty.
    #[serde(default)]
    pub sheet_webhook_url: String,
    #[serde(default)]
    pub counting_enabled: bool,
    #[serde(default)]
    pub lines: Vec<Line>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: None,
            camera_index: 0,
            capture_width: capture_width_default(),
            capture_height: capture_height_default(),
            model_path: model_path_default(),
            min_confidence: min_confidence_default(),
            vehicle_classes: vehicle_classes_default(),
            tracker_min_iou: tracker_min_iou_default(),
            tracker_max_misses: tracker_max_misses_default(),
            direction_samples: direction_samples_default(),
            history_capacity: history_capacity_default(),
            direction_axis: Axis::default(),
            occupancy_threshold: occupancy_threshold_default(),
            loop_interval_millis: loop_interval_millis_default(),
            event_log_path: event_log_path_default(),
            layouts_dir: layouts_dir_default(),
            sheet_webhook_url: String::default(),
            counting_enabled: false,
            lines: vec![],
        }
    }
}

impl Settings {
    /// The trajectory capacity, never below the direction sample count.
    pub fn effective_history_capacity(&self) -> usize {
        self.history_capacity.max(self.direction_samples)
    }
}

impl_identifiable!(Settings);

fn capture_width_default() -> i32 {
    1280
}

fn capture_height_default() -> i32 {
    720
}

fn model_path_default() -> String {
    "yolov8n.onnx".to_string()
}

fn min_confidence_default() -> f32 {
    0.25
}

fn vehicle_classes_default() -> BTreeSet<u32> {
    // COCO car, motorcycle, bus and truck
    BTreeSet::from([2, 3, 5, 7])
}

fn tracker_min_iou_default() -> f32 {
    0.3
}

fn tracker_max_misses_default() -> u32 {
    1
}

fn direction_samples_default() -> usize {
    10
}

fn history_capacity_default() -> usize {
    30
}

fn occupancy_threshold_default() -> f64 {
    60.0
}

fn loop_interval_millis_default() -> u64 {
    100
}

fn event_log_path_default() -> String {
    "car_counter_log.csv".to_string()
}

fn layouts_dir_default() -> String {
    "layouts".to_string()
}
