//! Input byte-stream access and per-file start-time metadata.
//!
//! Recordings live in an object store addressed by key; the pipeline only
//! needs sequential reads, so the boundary is a single open-by-key call.
//! `LocalBlobStore` serves keys from a directory tree, which is also what the
//! tests use.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::config::FileEntry;

pub trait BlobStore: Send + Sync {
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>>;
}

/// Directory-backed store: keys are paths relative to the root.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BlobStore for LocalBlobStore {
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.root.join(key);
        let file = std::fs::File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

#[derive(Debug, Deserialize)]
struct RecordedSensor {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Files", default)]
    files: Vec<String>,
    #[serde(rename = "ActualStartTime", default)]
    actual_start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionMetadata {
    #[serde(rename = "RecordedSensorList", default)]
    sensors: Vec<RecordedSensor>,
}

/// Parse the recorder's `Y:m:d:H:M:S:fraction` timestamps. The fractional
/// field is microseconds, possibly with fewer than six digits.
fn parse_session_time(value: &str) -> Result<NaiveDateTime> {
    let (main, frac) = value
        .rsplit_once(':')
        .with_context(|| format!("malformed start time '{value}'"))?;
    let base = NaiveDateTime::parse_from_str(main, "%Y:%m:%d:%H:%M:%S")
        .with_context(|| format!("malformed start time '{value}'"))?;
    let digits: String = frac.chars().take(6).collect();
    let micros: u32 = if digits.is_empty() {
        0
    } else {
        let parsed: u32 = digits
            .parse()
            .with_context(|| format!("malformed fractional seconds in '{value}'"))?;
        parsed * 10u32.pow(6 - digits.len() as u32)
    };
    base.checked_add_signed(chrono::Duration::microseconds(micros as i64))
        .context("start time out of range")
}

/// Resolve per-file relative start offsets (microseconds) from the session
/// metadata document. Offsets are relative to the latest sensor start so the
/// session-global zero is the moment every sensor was recording.
///
/// Any failure degrades to zero offsets for all files; the run continues.
pub fn resolve_relative_offsets(
    store: &dyn BlobStore,
    metadata_key: &str,
    files: &[FileEntry],
) -> HashMap<String, i64> {
    match try_resolve(store, metadata_key, files) {
        Ok(offsets) => offsets,
        Err(err) => {
            tracing::warn!(
                metadata_key,
                error = %err,
                "failed to resolve start-time metadata; using zero offsets for all files"
            );
            files.iter().map(|f| (f.path.clone(), 0)).collect()
        }
    }
}

fn try_resolve(
    store: &dyn BlobStore,
    metadata_key: &str,
    files: &[FileEntry],
) -> Result<HashMap<String, i64>> {
    let mut reader = store.open(metadata_key)?;
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    let metadata: SessionMetadata = serde_json::from_str(&buf)?;
    anyhow::ensure!(!metadata.sensors.is_empty(), "RecordedSensorList is empty");

    // Match metadata file names against configured paths by basename.
    let name_to_path: HashMap<&str, &str> = files
        .iter()
        .filter_map(|f| file_name(&f.path).map(|name| (name, f.path.as_str())))
        .collect();

    let mut start_times: HashMap<String, NaiveDateTime> = HashMap::new();
    for sensor in &metadata.sensors {
        let Some(start_str) = &sensor.actual_start_time else {
            tracing::warn!(sensor = %sensor.name, "sensor has no ActualStartTime");
            continue;
        };
        let start = match parse_session_time(start_str) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(sensor = %sensor.name, error = %err, "unparseable start time");
                continue;
            }
        };
        for file_name in &sensor.files {
            if let Some(path) = name_to_path.get(file_name.as_str()) {
                start_times.insert((*path).to_string(), start);
            }
        }
    }
    let base = *start_times
        .values()
        .max()
        .context("no file start times matched")?;
    let mut offsets = HashMap::with_capacity(files.len());
    for file in files {
        let offset_us = start_times
            .get(&file.path)
            .map(|start| (*start - base).num_microseconds().unwrap_or(0))
            .unwrap_or_else(|| {
                tracing::warn!(path = %file.path, "no start time for file; using zero offset");
                0
            });
        offsets.insert(file.path.clone(), offset_us);
    }
    Ok(offsets)
}

fn file_name(path: &str) -> Option<&str> {
    Path::new(path).file_name().and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserKind;

    struct MemoryStore(HashMap<String, Vec<u8>>);

    impl BlobStore for MemoryStore {
        fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
            let bytes = self
                .0
                .get(key)
                .with_context(|| format!("no such key: {key}"))?
                .clone();
            Ok(Box::new(std::io::Cursor::new(bytes)))
        }
    }

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            parser: ParserKind::PcapGps,
            entity: path.to_string(),
            signal_db_path: None,
            selected_signals: Vec::new(),
        }
    }

    #[test]
    fn test_parse_session_time_microseconds() {
        let t = parse_session_time("2024:03:01:10:20:30:250000").unwrap();
        assert_eq!(t.format("%H:%M:%S%.6f").to_string(), "10:20:30.250000");
        // Short fractional fields are left-aligned (tenths, hundredths, ...).
        let t = parse_session_time("2024:03:01:10:20:30:5").unwrap();
        assert_eq!(t.format("%.6f").to_string(), ".500000");
    }

    #[test]
    fn test_offsets_relative_to_latest_start() {
        let meta = r#"{"RecordedSensorList": [
            {"Name": "lidar", "Files": ["a.pcap"], "ActualStartTime": "2024:03:01:10:00:00:000000"},
            {"Name": "cam", "Files": ["b.mp4"], "ActualStartTime": "2024:03:01:10:00:02:500000"}
        ]}"#;
        let store = MemoryStore(HashMap::from([(
            "session/projectInfo.json".to_string(),
            meta.as_bytes().to_vec(),
        )]));
        let files = vec![entry("session/a.pcap"), entry("session/b.mp4")];
        let offsets = resolve_relative_offsets(&store, "session/projectInfo.json", &files);
        assert_eq!(offsets["session/a.pcap"], -2_500_000);
        assert_eq!(offsets["session/b.mp4"], 0);
    }

    #[test]
    fn test_missing_metadata_degrades_to_zero() {
        let store = MemoryStore(HashMap::new());
        let files = vec![entry("a.pcap"), entry("b.pcap")];
        let offsets = resolve_relative_offsets(&store, "gone.json", &files);
        assert_eq!(offsets.len(), 2);
        assert!(offsets.values().all(|&v| v == 0));
    }

    #[test]
    fn test_unmatched_file_gets_zero_offset() {
        let meta = r#"{"RecordedSensorList": [
            {"Name": "lidar", "Files": ["a.pcap"], "ActualStartTime": "2024:03:01:10:00:00:000000"}
        ]}"#;
        let store = MemoryStore(HashMap::from([("m.json".to_string(), meta.into())]));
        let files = vec![entry("a.pcap"), entry("other.pcap")];
        let offsets = resolve_relative_offsets(&store, "m.json", &files);
        assert_eq!(offsets["a.pcap"], 0);
        assert_eq!(offsets["other.pcap"], 0);
    }
}
