//! Session orchestration: wires storage, workers, queue, consumer and
//! progress publishing together for one playback-session run.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::barrier::SegmentBarrier;
use crate::config::{ParserKind, SessionConfig};
use crate::consumer::{ConsumerOptions, ConsumerStats, SegmentedEventConsumer};
use crate::progress::ProgressPublisher;
use crate::signals::{JsonSignalDatabase, SignalDatabase, SignalSelection};
use crate::storage::{resolve_relative_offsets, BlobStore};
use crate::worker::{self, DecoderFactory, WorkerShared, WorkerSpec};

pub const DEFAULT_SEGMENT_DURATION_US: i64 = 60_000_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Directory the per-segment .rrd files are written into.
    pub save_dir: PathBuf,
    /// Recording id prefix, typically `{user}/{project}`.
    pub session_key: String,
    pub user_id: String,
    pub project_id: String,
    pub server_url: String,
    /// Key of the recorder metadata document holding per-sensor start times.
    pub metadata_key: Option<String>,
    pub segment_duration_us: i64,
    pub queue_capacity: usize,
    pub show_progress: bool,
}

/// Run one session to completion: spawn a worker per input file, drain the
/// queue into segmented recordings, publish progress.
pub fn run_session(
    config: &SessionConfig,
    options: &SessionOptions,
    store: Arc<dyn BlobStore>,
    publisher: &mut dyn ProgressPublisher,
    decoder_factory: Option<DecoderFactory>,
    stop: Arc<AtomicBool>,
) -> Result<ConsumerStats> {
    anyhow::ensure!(options.segment_duration_us > 0, "segment duration must be positive");
    std::fs::create_dir_all(&options.save_dir)
        .with_context(|| format!("failed to create {}", options.save_dir.display()))?;

    let offsets = match &options.metadata_key {
        Some(key) => resolve_relative_offsets(store.as_ref(), key, &config.files),
        None => Default::default(),
    };

    // Load and validate signal databases before any thread starts, so a bad
    // configuration fails the whole run up front.
    let mut specs = Vec::with_capacity(config.files.len());
    for file in &config.files {
        let (signal_db, selection) = if file.parser == ParserKind::Riff {
            let db_path = file
                .signal_db_path
                .as_deref()
                .with_context(|| format!("entity '{}' names no signal database", file.entity))?;
            let db: Arc<dyn SignalDatabase> = Arc::new(
                JsonSignalDatabase::from_reader(store.open(db_path)?)
                    .with_context(|| format!("failed to load signal database {db_path}"))?,
            );
            SessionConfig::validate_signals(file, db.as_ref())?;
            let selection = SignalSelection::build(&file.entity, db.as_ref(), &file.selected_signals)?;
            (Some(db), Some(selection))
        } else {
            (None, None)
        };
        specs.push(WorkerSpec {
            entry: file.clone(),
            offset_us: offsets.get(&file.path).copied().unwrap_or(0),
            signal_db,
            selection,
            decoder_factory: decoder_factory.clone(),
        });
    }

    let (tx, rx) = flume::bounded(options.queue_capacity);
    let shared = WorkerShared {
        barrier: Arc::new(SegmentBarrier::new()),
        queue: tx,
        stop: Arc::clone(&stop),
        segment_duration_us: options.segment_duration_us,
    };

    let worker_count = specs.len();
    let handles: Vec<_> = specs
        .into_iter()
        .map(|spec| worker::spawn(spec, Arc::clone(&store), shared.clone()))
        .collect();
    // Workers hold their own sender clones; dropping ours lets the queue
    // disconnect once every worker is done.
    drop(shared);

    let mut consumer = SegmentedEventConsumer::new(ConsumerOptions {
        save_dir: options.save_dir.clone(),
        session_key: options.session_key.clone(),
        user_id: options.user_id.clone(),
        project_id: options.project_id.clone(),
        server_url: options.server_url.clone(),
        segment_duration_us: options.segment_duration_us,
        worker_count,
        show_progress: options.show_progress,
    });
    let result = consumer.run(&rx, publisher);

    // Unblock any worker still parked on a full queue or at the barrier
    // before joining.
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    drop(rx);
    for handle in handles {
        let _ = handle.join();
    }
    result?;
    Ok(consumer.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MemoryPublisher, ProgressMessage};
    use std::collections::HashMap;
    use std::io::Read;

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

    fn gps_capture(fixes: &[(u32, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&1u32.to_le_bytes());
        for (ts_sec, lat) in fixes {
            let payload = format!(
                "$GPRMC,123519,A,{lat},N,01131.000,E,022.4,084.4,230394,003.1,W*6A"
            );
            let mut ip = vec![0u8; 20];
            ip[0] = 0x45;
            ip[9] = 17;
            let mut frame = vec![0u8; 12];
            frame.extend_from_slice(&[0x08, 0x00]);
            frame.extend_from_slice(&ip);
            frame.extend_from_slice(&[0u8; 8]);
            frame.extend_from_slice(payload.as_bytes());

            buf.extend_from_slice(&ts_sec.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            buf.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            buf.extend_from_slice(&frame);
        }
        buf
    }

    #[test]
    fn test_single_file_session_publishes_progress_and_complete() {
        let capture = gps_capture(&[(10, "4807.038"), (11, "4807.040"), (12, "4807.042")]);
        let store = Arc::new(MemoryStore(HashMap::from([("g.pcap".to_string(), capture)])));
        let config = SessionConfig::from_json(
            r#"[{"upload_file_path": "g.pcap", "parser_name": "PcapGpsParser", "entity_name": "gps0"}]"#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let options = SessionOptions {
            save_dir: dir.path().to_path_buf(),
            session_key: "u1/p1".to_string(),
            user_id: "u1".to_string(),
            project_id: "p1".to_string(),
            server_url: "https://viz.example.com".to_string(),
            metadata_key: None,
            segment_duration_us: DEFAULT_SEGMENT_DURATION_US,
            queue_capacity: 16,
            show_progress: false,
        };
        let mut publisher = MemoryPublisher::new();

        let stats = run_session(
            &config,
            &options,
            store,
            &mut publisher,
            None,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_eq!(stats.gps_fixes, 3);
        assert_eq!(stats.segments, 1);
        assert!(dir.path().join("0.rrd").exists());

        let messages = publisher.messages();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0].1,
            ProgressMessage::Progressing { segment_index: 0, .. }
        ));
        assert_eq!(messages[1].1, ProgressMessage::Complete);
        assert!(publisher.is_disconnected());
    }

    #[test]
    fn test_session_fails_fast_on_missing_signal_database() {
        let store = Arc::new(MemoryStore(HashMap::new()));
        let config = SessionConfig::from_json(
            r#"[{"upload_file_path": "c.riff", "parser_name": "RiffParser", "entity_name": "can0",
                 "dbc_file_name": "missing.json",
                 "selected_signals": [{"message_name": "Vehicle", "signal_names": ["Speed"]}]}]"#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let options = SessionOptions {
            save_dir: dir.path().to_path_buf(),
            session_key: "u1/p1".to_string(),
            user_id: "u1".to_string(),
            project_id: "p1".to_string(),
            server_url: "https://viz.example.com".to_string(),
            metadata_key: None,
            segment_duration_us: DEFAULT_SEGMENT_DURATION_US,
            queue_capacity: 16,
            show_progress: false,
        };
        let mut publisher = MemoryPublisher::new();

        let err = run_session(
            &config,
            &options,
            store,
            &mut publisher,
            None,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing.json"));
        assert!(publisher.messages().is_empty());
    }
}
