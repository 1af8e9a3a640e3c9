use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, atomic::Ordering},
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{Result, bail};
use log::{error, info};

mod bridge;
mod database;
mod detect;
mod direction;
mod event_log;
mod frame_buffer;
mod history;
mod layout;
mod mat;
mod models;
mod occupancy;
mod overlay;
mod pipeline;
mod run;
mod sheet;
mod shared;
mod tracker;

pub use {
    bridge::{Camera, DefaultCamera},
    database::Database,
    detect::{Detector, YoloDetector, init_onnxruntime},
    direction::{Axis, Direction, DirectionClassifier, Line},
    event_log::{CrossingEvent, DirectionCounts, EventLog, EventSink, SyncBatch, VehicleFeed},
    frame_buffer::FrameBuffer,
    history::TrackHistory,
    layout::LayoutStore,
    mat::{Frame, OwnedMat},
    models::*,
    occupancy::{Occupancy, OccupancySummary, Slot, SlotPoint, SlotStatus, evaluate_occupancy},
    pipeline::CountingPipeline,
    sheet::{SheetSync, WebhookSheet, sync_events},
    shared::Shared,
    strum::{IntoEnumIterator, ParseError},
    tracker::{Detection, ObjectTracker, Track, TrackId},
};

use crate::{
    mat::to_jpeg_base64,
    run::{CurrentLayout, SystemState, spawn_loops},
};

/// Number of events returned by [`CameraSystem::vehicle_feed`].
const FEED_LEN: usize = 50;

/// A running camera with its capture and counting loops.
///
/// Dropping the handle stops both loops.
#[derive(Debug)]
pub struct CameraSystem {
    state: Arc<SystemState>,
    layouts: LayoutStore,
    sheet: Option<WebhookSheet>,
    occupancy_threshold: f64,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CameraSystem {
    /// Starts capturing from `camera` and counting with `detector` as configured by `settings`.
    pub fn start(settings: &Settings, camera: impl Camera, detector: impl Detector) -> Result<Self> {
        let system = Self::new(settings)?;
        let handles = spawn_loops(
            system.state.clone(),
            camera,
            detector,
            CountingPipeline::new(settings),
            Duration::from_millis(settings.loop_interval_millis),
        );
        *system.handles.lock().unwrap() = handles;
        info!(target: "system", "camera system started");

        Ok(system)
    }

    fn new(settings: &Settings) -> Result<Self> {
        let sheet = if settings.sheet_webhook_url.is_empty() {
            None
        } else {
            Some(WebhookSheet::new(&settings.sheet_webhook_url)?)
        };

        Ok(Self {
            state: Arc::new(SystemState::new(
                settings.counting_enabled,
                settings.lines.clone(),
                EventLog::with_csv(&settings.event_log_path),
            )),
            layouts: LayoutStore::new(&settings.layouts_dir),
            sheet,
            occupancy_threshold: settings.occupancy_threshold,
            handles: Mutex::new(vec![]),
        })
    }

    pub fn set_counting_enabled(&self, enabled: bool) {
        self.state.counting_enabled.replace(enabled);
        info!(target: "system", "counting {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn counting_enabled(&self) -> bool {
        *self.state.counting_enabled.snapshot()
    }

    /// Replaces the reference lines.
    ///
    /// Direction classification only runs while exactly two lines are set.
    pub fn set_lines(&self, lines: Vec<Line>) {
        info!(target: "system", "lines updated {lines:?}");
        self.state.lines.replace(lines);
    }

    pub fn lines(&self) -> Vec<Line> {
        self.state.lines.snapshot().as_ref().clone()
    }

    /// The latest events and the per-direction counts.
    pub fn vehicle_feed(&self) -> VehicleFeed {
        self.state.events.feed(FEED_LEN)
    }

    /// Mirrors the unsynced events to the configured webhook sheet.
    pub async fn sync_sheet(&self) -> Result<usize> {
        let Some(sheet) = self.sheet.as_ref() else {
            bail!("spreadsheet webhook is not configured");
        };
        self.sync_sheet_with(sheet).await
    }

    /// Mirrors the unsynced events to `sheet`.
    pub async fn sync_sheet_with(&self, sheet: &impl SheetSync) -> Result<usize> {
        sync_events(&self.state.events, sheet).await
    }

    /// Persists `slots` as layout `name`.
    pub fn save_layout(&self, name: &str, slots: &[Slot]) -> Result<()> {
        self.layouts.save(name, slots)
    }

    /// Loads layout `name` and makes it the layout used by [`Self::detect_occupancy`].
    ///
    /// A missing layout loads as empty.
    pub fn load_layout(&self, name: &str) -> Result<Vec<Slot>> {
        let slots = self.layouts.load(name)?;
        self.state.layout.replace(CurrentLayout {
            name: Some(name.to_string()),
            slots: slots.clone(),
        });
        Ok(slots)
    }

    pub fn list_layouts(&self) -> Result<BTreeSet<String>> {
        self.layouts.list_names()
    }

    pub fn current_layout_name(&self) -> Option<String> {
        self.state.layout.snapshot().name.clone()
    }

    /// Evaluates the current layout against the latest frame.
    ///
    /// Empty when no frame has been captured yet or no layout is loaded.
    pub fn detect_occupancy(&self) -> Result<Occupancy> {
        let layout = self.state.layout.snapshot();
        if layout.slots.is_empty() {
            return Ok(Occupancy::default());
        }
        let Some(frame) = self.state.frames.read() else {
            return Ok(Occupancy::default());
        };

        evaluate_occupancy(&frame.to_grayscale()?, &layout.slots, self.occupancy_threshold)
    }

    /// Encodes the latest frame as base64 JPEG, `None` before the first frame.
    ///
    /// When `annotated`, the lines and the latest tracks are drawn on a copy of the frame.
    pub fn frame_jpeg_base64(&self, annotated: bool) -> Result<Option<String>> {
        let Some(frame) = self.state.frames.read() else {
            return Ok(None);
        };
        let mat = if annotated {
            overlay::annotate(
                &frame,
                &self.state.lines.snapshot(),
                &self.state.tracks.snapshot(),
            )?
        } else {
            frame.to_mat()?
        };

        to_jpeg_base64(&mat).map(Some)
    }

    /// Stops both loops and waits for them to exit.
    pub fn stop(&self) {
        self.state.stop.store(true, Ordering::Release);
        let handles = self.handles.lock().unwrap().drain(..).collect::<Vec<_>>();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                error!(target: "system", "loop thread panicked");
            }
        }
        info!(target: "system", "camera system stopped");
    }
}

impl Drop for CameraSystem {
    fn drop(&mut self) {
        self.stop();
    }
}
