use std::{
    collections::{BTreeSet, HashMap},
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::error;
use serde::Serialize;

use crate::{direction::Direction, tracker::TrackId};

const HEADER: [&str; 7] = [
    "track_id",
    "direction",
    "vehicle_type",
    "color",
    "speed",
    "timestamp",
    "synced",
];
const UNKNOWN: &str = "unknown";
const SYNCED: &str = "Yes";
const UNSYNCED: &str = "No";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A one time record of a track passing both reference lines.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct CrossingEvent {
    /// The display label, `ID-<track id>`.
    pub label: String,
    pub track_id: TrackId,
    pub direction: Direction,
    pub vehicle: String,
    pub timestamp: DateTime<Local>,
    pub synced: bool,
}

impl CrossingEvent {
    pub fn new(track_id: TrackId, direction: Direction, vehicle: impl Into<String>) -> Self {
        Self {
            label: format!("ID-{track_id}"),
            track_id,
            direction,
            vehicle: vehicle.into(),
            timestamp: Local::now(),
            synced: false,
        }
    }

    /// The six uploaded columns, the color and speed columns are placeholders.
    pub fn row(&self) -> Vec<String> {
        vec![
            self.label.clone(),
            self.direction.to_string(),
            self.vehicle.clone(),
            UNKNOWN.to_string(),
            UNKNOWN.to_string(),
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        ]
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize)]
pub struct DirectionCounts {
    pub direction_a: usize,
    pub direction_b: usize,
    pub total: usize,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize)]
pub struct VehicleFeed {
    /// Most recent events, oldest first.
    pub vehicles: Vec<CrossingEvent>,
    pub counts: DirectionCounts,
}

/// Receives crossing events from the counting loop.
pub trait EventSink: Send + Sync {
    /// Appends `event` to the log.
    ///
    /// The in-memory log keeps the event even when persisting it fails, in which case the
    /// error is still returned.
    fn record(&self, event: CrossingEvent) -> Result<()>;

    /// The latest `n` events, oldest first.
    fn list_recent(&self, n: usize) -> Vec<CrossingEvent>;

    fn counts_by_direction(&self) -> HashMap<Direction, usize>;
}

/// Unsynced rows read from the CSV file at the start of a sync.
#[derive(Debug, Default)]
pub struct SyncBatch {
    /// Zero based data row indices, header excluded.
    row_indices: BTreeSet<usize>,
    pub rows: Vec<Vec<String>>,
}

impl SyncBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn contains(&self, event: &CrossingEvent) -> bool {
        let timestamp = event.timestamp.format(TIMESTAMP_FORMAT).to_string();
        self.rows
            .iter()
            .any(|row| row.first() == Some(&event.label) && row.get(5) == Some(&timestamp))
    }
}

/// An append only crossing event log kept in memory and optionally mirrored to a CSV file.
///
/// The memory lock and the file lock are never held together.
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<Vec<CrossingEvent>>,
    file: Option<Mutex<PathBuf>>,
    syncing: AtomicBool,
}

impl EventLog {
    pub fn in_memory() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            file: None,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn with_csv(path: impl Into<PathBuf>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            file: Some(Mutex::new(path.into())),
            syncing: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|file| file.lock().unwrap().clone())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feed(&self, n: usize) -> VehicleFeed {
        let counts = self.counts_by_direction();
        let direction_a = counts.get(&Direction::A).copied().unwrap_or_default();
        let direction_b = counts.get(&Direction::B).copied().unwrap_or_default();

        VehicleFeed {
            vehicles: self.list_recent(n),
            counts: DirectionCounts {
                direction_a,
                direction_b,
                total: direction_a + direction_b,
            },
        }
    }

    /// Marks a sync as running, returning `false` if one already is.
    pub(crate) fn try_start_sync(&self) -> bool {
        !self.syncing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_sync(&self) {
        self.syncing.store(false, Ordering::Release);
    }

    /// Collects the rows of the CSV file not yet marked synced.
    ///
    /// Returns an empty batch for an in-memory log or a missing file.
    pub fn begin_sync(&self) -> Result<SyncBatch> {
        let Some(file) = self.file.as_ref() else {
            return Ok(SyncBatch::default());
        };
        let path = file.lock().unwrap();
        if !path.exists() {
            return Ok(SyncBatch::default());
        }

        let (_, records) = read_records(&path)?;
        let mut batch = SyncBatch::default();
        for (i, record) in records.iter().enumerate() {
            if !is_synced(record) {
                batch.row_indices.insert(i);
                batch.rows.push(record.iter().take(6).map(String::from).collect());
            }
        }

        Ok(batch)
    }

    /// Rewrites the CSV file marking the rows of `batch` as synced and flips the in-memory
    /// flags of the events those rows were written from.
    ///
    /// Events whose append failed have no row and stay unsynced.
    ///
    /// Rows appended after [`Self::begin_sync`] are kept unchanged.
    pub fn finish_sync(&self, batch: &SyncBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Some(file) = self.file.as_ref() {
            let path = file.lock().unwrap();
            let (header, records) = read_records(&path)?;
            let mut writer = WriterBuilder::new()
                .flexible(true)
                .from_path(path.as_path())
                .with_context(|| format!("failed to rewrite {}", path.display()))?;
            writer.write_record(&header)?;
            for (i, record) in records.iter().enumerate() {
                if batch.row_indices.contains(&i) {
                    let mut fields = record.iter().take(6).collect::<Vec<_>>();
                    fields.push(SYNCED);
                    writer.write_record(fields)?;
                } else {
                    writer.write_record(record)?;
                }
            }
            writer.flush()?;
        }

        let mut events = self.events.lock().unwrap();
        for event in events.iter_mut().filter(|event| batch.contains(event)) {
            event.synced = true;
        }
        Ok(())
    }

    fn append_to_file(&self, event: &CrossingEvent) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let path = file.lock().unwrap();
        let is_new = path.metadata().map(|meta| meta.len() == 0).unwrap_or(true);
        let handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_path())
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut writer = WriterBuilder::new().flexible(true).from_writer(handle);
        if is_new {
            writer.write_record(HEADER)?;
        }
        let mut row = event.row();
        row.push(if event.synced { SYNCED } else { UNSYNCED }.to_string());
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for EventLog {
    fn record(&self, event: CrossingEvent) -> Result<()> {
        let result = self.append_to_file(&event);
        if let Err(err) = result.as_ref() {
            error!(target: "counter", "failed to persist {}: {err:#}", event.label);
        }
        self.events.lock().unwrap().push(event);
        result
    }

    fn list_recent(&self, n: usize) -> Vec<CrossingEvent> {
        let events = self.events.lock().unwrap();
        events[events.len().saturating_sub(n)..].to_vec()
    }

    fn counts_by_direction(&self) -> HashMap<Direction, usize> {
        let events = self.events.lock().unwrap();
        let mut counts = HashMap::new();
        for event in events.iter() {
            *counts.entry(event.direction).or_default() += 1;
        }
        counts
    }
}

fn read_records(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let header = reader.headers()?.clone();
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    Ok((header, records))
}

fn is_synced(record: &StringRecord) -> bool {
    record
        .get(6)
        .is_some_and(|synced| synced.trim().eq_ignore_ascii_case(SYNCED))
}

#[cfg(test)]
mod tests {
    use std::{env, fs, process};

    use super::*;

    fn temp_csv(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("event-log-{}-{name}", process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir.join("car_counter_log.csv")
    }

    #[test]
    fn record_writes_header_once() {
        let path = temp_csv("header");
        let log = EventLog::with_csv(&path);

        log.record(CrossingEvent::new(1, Direction::B, "car")).unwrap();
        log.record(CrossingEvent::new(2, Direction::A, "truck"))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "track_id,direction,vehicle_type,color,speed,timestamp,synced"
        );
        assert!(lines[1].starts_with("ID-1,DirectionB,car,unknown,unknown,"));
        assert!(lines[2].ends_with(",No"));
    }

    #[test]
    fn record_keeps_memory_when_file_fails() {
        let dir = temp_csv("unwritable");
        // A directory cannot be opened for appending
        fs::create_dir_all(&dir).unwrap();
        let log = EventLog::with_csv(&dir);

        let result = log.record(CrossingEvent::new(3, Direction::A, "bus"));

        assert!(result.is_err());
        assert_eq!(log.len(), 1);
        assert_eq!(log.list_recent(10)[0].label, "ID-3");
    }

    #[test]
    fn list_recent_returns_latest_in_order() {
        let log = EventLog::in_memory();
        for id in 1..=60 {
            log.record(CrossingEvent::new(id, Direction::A, "car"))
                .unwrap();
        }

        let recent = log.list_recent(50);

        assert_eq!(recent.len(), 50);
        assert_eq!(recent.first().unwrap().track_id, 11);
        assert_eq!(recent.last().unwrap().track_id, 60);
    }

    #[test]
    fn feed_counts_by_direction() {
        let log = EventLog::in_memory();
        log.record(CrossingEvent::new(1, Direction::A, "car"))
            .unwrap();
        log.record(CrossingEvent::new(2, Direction::B, "car"))
            .unwrap();
        log.record(CrossingEvent::new(3, Direction::B, "bus"))
            .unwrap();

        let feed = log.feed(50);

        assert_eq!(
            feed.counts,
            DirectionCounts {
                direction_a: 1,
                direction_b: 2,
                total: 3
            }
        );
        assert_eq!(feed.vehicles.len(), 3);
    }

    #[test]
    fn sync_marks_only_batched_rows() {
        let path = temp_csv("sync");
        let log = EventLog::with_csv(&path);
        log.record(CrossingEvent::new(1, Direction::A, "car"))
            .unwrap();
        log.record(CrossingEvent::new(2, Direction::B, "car"))
            .unwrap();

        let batch = log.begin_sync().unwrap();
        log.record(CrossingEvent::new(3, Direction::B, "truck"))
            .unwrap();
        log.finish_sync(&batch).unwrap();

        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].len(), 6);
        let content = fs::read_to_string(&path).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert!(lines[1].ends_with(",Yes"));
        assert!(lines[2].ends_with(",Yes"));
        assert!(lines[3].ends_with(",No"));
        let flags = log
            .list_recent(3)
            .into_iter()
            .map(|event| event.synced)
            .collect::<Vec<_>>();
        assert_eq!(flags, vec![true, true, false]);

        let batch = log.begin_sync().unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0][0], "ID-3");
    }

    #[test]
    fn sync_leaves_unpersisted_events_unsynced() {
        let path = temp_csv("unpersisted");
        let dir = path.parent().unwrap().to_path_buf();
        fs::remove_dir_all(&dir).unwrap();
        let log = EventLog::with_csv(&path);

        // The directory is missing so this append fails
        assert!(log.record(CrossingEvent::new(1, Direction::A, "car")).is_err());
        fs::create_dir_all(&dir).unwrap();
        log.record(CrossingEvent::new(2, Direction::B, "car"))
            .unwrap();

        let batch = log.begin_sync().unwrap();
        log.finish_sync(&batch).unwrap();

        assert_eq!(batch.rows.len(), 1);
        let flags = log
            .list_recent(2)
            .into_iter()
            .map(|event| (event.track_id, event.synced))
            .collect::<Vec<_>>();
        assert_eq!(flags, vec![(1, false), (2, true)]);
    }

    #[test]
    fn sync_of_missing_file_is_empty() {
        let path = temp_csv("missing");

        assert!(EventLog::with_csv(&path).begin_sync().unwrap().is_empty());
        assert!(EventLog::in_memory().begin_sync().unwrap().is_empty());
    }

    #[test]
    fn sync_treats_short_rows_as_unsynced() {
        let path = temp_csv("short");
        fs::write(
            &path,
            "track_id,direction,vehicle_type,color,speed,timestamp,synced\n\
             ID-1,DirectionA,car,unknown,unknown,2024-01-01 00:00:00,yes\n\
             ID-2,DirectionB,car,unknown,unknown,2024-01-01 00:00:01\n",
        )
        .unwrap();
        let log = EventLog::with_csv(&path);

        let batch = log.begin_sync().unwrap();
        log.finish_sync(&batch).unwrap();

        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0][0], "ID-2");
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.lines().nth(1).unwrap().ends_with(",yes"));
        assert!(content.lines().nth(2).unwrap().ends_with(",Yes"));
    }
}
