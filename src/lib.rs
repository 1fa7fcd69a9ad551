//! session2rrd - Convert recorded multi-sensor sessions into segmented Rerun
//! .rrd files.
//!
//! A session is a set of recorded files (LiDAR and GPS packet captures, CAN
//! signal containers, video) described by a configuration document. One
//! worker thread per file decodes its stream into normalized events on a
//! shared bounded queue; a barrier keeps the workers aligned on fixed
//! segment windows of session time; the consumer drains the queue into one
//! Rerun recording per segment and publishes progress after each.
//!
//! # Inputs
//!
//! - **GPS**: pcap captures of NMEA RMC sentences → GeoPoints + trajectory
//! - **LiDAR**: pcap captures of Velodyne packets → Points3D rotation frames
//! - **CAN**: RIFF signal containers with a JSON signal database → Scalars
//!   charts and a markdown dashboard
//! - **Video**: decoder-provided frames → subsampled, scaled JPEG images
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use session2rrd::config::SessionConfig;
//! use session2rrd::progress::TracingPublisher;
//! use session2rrd::session::{run_session, SessionOptions, DEFAULT_QUEUE_CAPACITY, DEFAULT_SEGMENT_DURATION_US};
//! use session2rrd::storage::LocalBlobStore;
//!
//! let config = SessionConfig::from_json(r#"[
//!     {"upload_file_path": "gps0.pcap", "parser_name": "PcapGpsParser", "entity_name": "gps0"}
//! ]"#)?;
//! let options = SessionOptions {
//!     save_dir: "out".into(),
//!     session_key: "user/project".to_string(),
//!     user_id: "user".to_string(),
//!     project_id: "project".to_string(),
//!     server_url: "http://localhost:8080".to_string(),
//!     metadata_key: None,
//!     segment_duration_us: DEFAULT_SEGMENT_DURATION_US,
//!     queue_capacity: DEFAULT_QUEUE_CAPACITY,
//!     show_progress: false,
//! };
//! let mut publisher = TracingPublisher;
//! let stats = run_session(
//!     &config,
//!     &options,
//!     Arc::new(LocalBlobStore::new(".")),
//!     &mut publisher,
//!     None,
//!     Arc::new(AtomicBool::new(false)),
//! )?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod barrier;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod event;
pub mod inspect;
pub mod parsers;
pub mod progress;
pub mod readers;
pub mod schema;
pub mod session;
pub mod signals;
pub mod storage;
pub mod worker;

// Re-export main types for convenience
pub use config::{ParserKind, SessionConfig};
pub use consumer::{ConsumerStats, SegmentedEventConsumer};
pub use event::{Event, QueueMessage};
pub use session::{run_session, SessionOptions};
