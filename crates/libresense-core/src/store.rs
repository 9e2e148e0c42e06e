//! Persistent log storage
//!
//! Downloaded history ends up in a [`LogStore`]: an append/read store keyed
//! by device id. The session layer only uses it to pick the `since`
//! timestamp for the next download and to hand off fresh records; the
//! on-disk format is the store's own business.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::protocol::LogRecord;

/// Errors from loading or persisting a store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store file does not contain a valid store
    #[error("store file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Append/read storage for downloaded log records, keyed by device id.
pub trait LogStore {
    /// Latest record timestamp per device
    fn max_timestamps(&self) -> BTreeMap<String, DateTime<Utc>>;

    /// Devices the store holds records for
    fn device_ids(&self) -> Vec<String>;

    /// All records of one device, oldest first
    fn records(&self, device_id: &str) -> Vec<LogRecord>;

    /// Append freshly downloaded records for a device
    fn append_records(&mut self, device_id: &str, records: Vec<LogRecord>);

    /// Write the store to its backing file
    fn persist(&self) -> Result<(), StoreError>;
}

/// A [`LogStore`] backed by a single JSON file.
pub struct JsonStore {
    path: PathBuf,
    data: BTreeMap<String, Vec<LogRecord>>,
}

impl JsonStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = match File::open(&path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "store file not found, starting empty");
                BTreeMap::new()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, data })
    }

    /// Total number of stored records across all devices
    pub fn record_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }
}

impl LogStore for JsonStore {
    fn max_timestamps(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.data
            .iter()
            .filter_map(|(device_id, records)| {
                records
                    .iter()
                    .map(|record| record.timestamp)
                    .max()
                    .map(|ts| (device_id.clone(), ts))
            })
            .collect()
    }

    fn device_ids(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    fn records(&self, device_id: &str) -> Vec<LogRecord> {
        self.data.get(device_id).cloned().unwrap_or_default()
    }

    fn append_records(&mut self, device_id: &str, mut records: Vec<LogRecord>) {
        self.data
            .entry(device_id.to_string())
            .or_default()
            .append(&mut records);
    }

    fn persist(&self) -> Result<(), StoreError> {
        let file = File::create(&self.path)?;
        serde_json::to_writer(BufWriter::new(file), &self.data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(epoch: i64, channel: u16, value: f32) -> LogRecord {
        LogRecord {
            timestamp: DateTime::<Utc>::from_timestamp(epoch, 0).unwrap(),
            values: BTreeMap::from([(channel, value)]),
        }
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("logs.json")).unwrap();
        assert!(store.device_ids().is_empty());
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");

        let mut store = JsonStore::open(&path).unwrap();
        store.append_records(
            "0019FF014203",
            vec![record(1_000_000, 100, 20.5), record(1_000_060, 100, 21.0)],
        );
        store.persist().unwrap();

        let reloaded = JsonStore::open(&path).unwrap();
        assert_eq!(reloaded.device_ids(), vec!["0019FF014203".to_string()]);
        let records = reloaded.records("0019FF014203");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].values.get(&100), Some(&21.0));

        let max = reloaded.max_timestamps();
        assert_eq!(
            max.get("0019FF014203").map(|ts| ts.timestamp()),
            Some(1_000_060)
        );
    }

    #[test]
    fn test_append_extends_existing_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::open(dir.path().join("logs.json")).unwrap();
        store.append_records("A", vec![record(10, 100, 1.0)]);
        store.append_records("A", vec![record(20, 100, 2.0)]);
        assert_eq!(store.records("A").len(), 2);
        assert_eq!(store.record_count(), 2);
    }
}
