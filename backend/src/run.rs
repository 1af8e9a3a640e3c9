use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{error, info};

use crate::{
    bridge::Camera,
    detect::Detector,
    direction::Line,
    event_log::{EventLog, EventSink},
    frame_buffer::FrameBuffer,
    mat::OwnedMat,
    occupancy::Slot,
    pipeline::CountingPipeline,
    shared::Shared,
    tracker::Track,
};

/// The slot layout evaluated by occupancy queries.
#[derive(Clone, Debug, Default)]
pub struct CurrentLayout {
    pub name: Option<String>,
    pub slots: Vec<Slot>,
}

/// State shared between the loops and the [`crate::CameraSystem`] handle.
///
/// Configuration is only ever replaced wholesale through [`Shared`].
#[derive(Debug)]
pub(crate) struct SystemState {
    pub frames: FrameBuffer,
    pub counting_enabled: Shared<bool>,
    pub lines: Shared<Vec<Line>>,
    /// Tracks from the latest counting tick, for display.
    pub tracks: Shared<Vec<Track>>,
    pub layout: Shared<CurrentLayout>,
    pub events: EventLog,
    pub stop: AtomicBool,
}

impl SystemState {
    pub fn new(counting_enabled: bool, lines: Vec<Line>, events: EventLog) -> Self {
        Self {
            frames: FrameBuffer::new(),
            counting_enabled: Shared::new(counting_enabled),
            lines: Shared::new(lines),
            tracks: Shared::new(vec![]),
            layout: Shared::new(CurrentLayout::default()),
            events,
            stop: AtomicBool::new(false),
        }
    }
}

/// Pulls frames from a [`Camera`] into the [`FrameBuffer`].
#[derive(Debug)]
pub(crate) struct CaptureWorker<C: Camera> {
    camera: C,
    failing: bool,
}

impl<C: Camera> CaptureWorker<C> {
    pub fn new(camera: C) -> Self {
        Self {
            camera,
            failing: false,
        }
    }

    pub fn tick(&mut self, frames: &FrameBuffer) {
        match self
            .camera
            .capture_frame()
            .and_then(OwnedMat::new)
        {
            Ok(frame) => {
                if self.failing {
                    info!(target: "capture", "camera recovered");
                    self.failing = false;
                }
                frames.write(frame);
            }
            Err(err) => {
                if !self.failing {
                    error!(target: "capture", "capturing frame failed {err:#}");
                    self.failing = true;
                }
            }
        }
    }
}

/// Runs detection and counting over the latest frame.
#[derive(Debug)]
pub(crate) struct CountingWorker<D: Detector> {
    detector: D,
    pipeline: CountingPipeline,
    last_frame: Option<Arc<OwnedMat>>,
}

impl<D: Detector> CountingWorker<D> {
    pub fn new(detector: D, pipeline: CountingPipeline) -> Self {
        Self {
            detector,
            pipeline,
            last_frame: None,
        }
    }

    pub fn tick(&mut self, state: &SystemState, sink: &impl EventSink) {
        if !*state.counting_enabled.snapshot() {
            return;
        }
        let Some(frame) = state.frames.read() else {
            return;
        };
        if self
            .last_frame
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, &frame))
        {
            return;
        }

        self.last_frame = Some(frame.clone());

        // The frame buffer lock is already released here
        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                error!(target: "counter", "detection failed, skipping frame {err:#}");
                return;
            }
        };

        let lines = state.lines.snapshot();
        let detector = &self.detector;
        let events = self
            .pipeline
            .process(detections, &lines, |class_id| detector.class_name(class_id));
        state.tracks.replace(self.pipeline.tracks().to_vec());

        for event in events {
            // Failures are logged by the sink and the event stays in memory
            let _ = sink.record(event);
        }
    }
}

/// Spawns the capture and counting threads.
pub(crate) fn spawn_loops(
    state: Arc<SystemState>,
    camera: impl Camera,
    detector: impl Detector,
    pipeline: CountingPipeline,
    interval: Duration,
) -> Vec<thread::JoinHandle<()>> {
    let capture_state = state.clone();
    let mut capture = CaptureWorker::new(camera);
    let capture_handle = thread::spawn(move || {
        info!(target: "capture", "capture loop started");
        loop_with_interval(interval, &capture_state.stop, || {
            capture.tick(&capture_state.frames);
        });
        info!(target: "capture", "capture loop stopped");
    });

    let mut counting = CountingWorker::new(detector, pipeline);
    let counting_handle = thread::spawn(move || {
        info!(target: "counter", "counting loop started");
        loop_with_interval(interval, &state.stop, || {
            counting.tick(&state, &state.events);
        });
        info!(target: "counter", "counting loop stopped");
    });

    vec![capture_handle, counting_handle]
}

/// Calls `on_tick` every `interval` until `stop` is raised.
///
/// `stop` is checked once per iteration before ticking. A tick running longer than `interval`
/// starts the next one immediately.
pub(crate) fn loop_with_interval(interval: Duration, stop: &AtomicBool, mut on_tick: impl FnMut()) {
    #[cfg(debug_assertions)]
    const LOG_INTERVAL_SECS: u64 = 5;
    #[cfg(debug_assertions)]
    let mut last_logged_instant = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let start = Instant::now();

        on_tick();

        let now = Instant::now();
        let elapsed = now.duration_since(start);
        if elapsed <= interval {
            thread::sleep(interval - elapsed);
        } else {
            #[cfg(debug_assertions)]
            if now.duration_since(last_logged_instant).as_secs() >= LOG_INTERVAL_SECS {
                use log::debug;

                last_logged_instant = now;
                debug!(target: "run", "ticking running late at {}ms", elapsed.as_millis());
            }
        }
    }
}
