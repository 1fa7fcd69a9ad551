//! Sensor stream workers: one thread per input file.
//!
//! A worker opens its blob, drives the matching reader, holds at the segment
//! barrier whenever an event crosses into the next segment window, and pushes
//! normalized events onto the shared bounded queue. Whatever happens, it
//! deregisters from the barrier and sends its end-of-stream sentinel so the
//! consumer and the other workers never hang on it.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::barrier::SegmentBarrier;
use crate::config::{FileEntry, ParserKind};
use crate::event::{Event, QueueMessage};
use crate::parsers::gps::GpsSentenceParser;
use crate::parsers::lidar::LidarPacketParser;
use crate::readers::pcap::{PacketCaptureReader, PayloadKind};
use crate::readers::riff::SignalContainerReader;
use crate::readers::video::{VideoDecoder, VideoReader};
use crate::signals::{SignalDatabase, SignalSelection};
use crate::storage::BlobStore;

/// Builds a decoder over an opened video blob. Injected because codec
/// support is deployment-specific.
pub type DecoderFactory =
    Arc<dyn Fn(Box<dyn Read + Send>) -> Result<Box<dyn VideoDecoder>> + Send + Sync>;

/// Cooperative-cancellation marker. Raised out of the read loop when the
/// stop flag is set; logged as a normal shutdown, not a failure.
#[derive(Debug, Error)]
#[error("stop requested")]
struct StopRequested;

/// Everything a single worker needs for its file.
pub struct WorkerSpec {
    pub entry: FileEntry,
    pub offset_us: i64,
    pub signal_db: Option<Arc<dyn SignalDatabase>>,
    pub selection: Option<SignalSelection>,
    pub decoder_factory: Option<DecoderFactory>,
}

/// State shared by all workers of one session.
#[derive(Clone)]
pub struct WorkerShared {
    pub barrier: Arc<SegmentBarrier>,
    pub queue: flume::Sender<QueueMessage>,
    pub stop: Arc<AtomicBool>,
    pub segment_duration_us: i64,
}

/// Tracks which segment window this worker is emitting into and holds at the
/// barrier until every worker is ready to cross into the next one.
struct SegmentGate<'a> {
    barrier: &'a SegmentBarrier,
    worker_id: &'a str,
    segment_duration_us: i64,
    index: i64,
}

impl<'a> SegmentGate<'a> {
    fn new(barrier: &'a SegmentBarrier, worker_id: &'a str, segment_duration_us: i64) -> Self {
        Self {
            barrier,
            worker_id,
            segment_duration_us,
            index: 0,
        }
    }

    fn wait_if_needed(&mut self, timestamp_us: i64) {
        while timestamp_us >= (self.index + 1) * self.segment_duration_us {
            self.barrier.wait(self.worker_id);
            self.index += 1;
        }
    }
}

/// Spawn the worker thread for one file. Registration happens before this
/// returns, so the barrier's active set is complete before any worker can
/// reach its first window boundary.
pub fn spawn(spec: WorkerSpec, store: Arc<dyn BlobStore>, shared: WorkerShared) -> JoinHandle<()> {
    shared.barrier.register(&spec.entry.entity);
    std::thread::spawn(move || {
        let entity = spec.entry.entity.clone();
        tracing::info!(entity = %entity, path = %spec.entry.path, parser = spec.entry.parser.name(), "worker started");

        match run(&spec, store.as_ref(), &shared) {
            Ok(()) => tracing::info!(entity = %entity, "worker finished"),
            Err(err) if err.is::<StopRequested>() => {
                tracing::info!(entity = %entity, "worker stopped")
            }
            Err(err) => tracing::warn!(entity = %entity, error = %err, "worker terminated"),
        }

        shared.barrier.deregister(&entity);
        // The sentinel is best-effort: a closed queue means the consumer is
        // already gone.
        let _ = shared.queue.send(QueueMessage::Finished { entity });
    })
}

fn run(spec: &WorkerSpec, store: &dyn BlobStore, shared: &WorkerShared) -> Result<()> {
    let stream = store.open(&spec.entry.path)?;
    let entity = spec.entry.entity.as_str();
    let mut gate = SegmentGate::new(&shared.barrier, entity, shared.segment_duration_us);

    let mut emit = |event: Event| -> Result<()> {
        if shared.stop.load(Ordering::Relaxed) {
            return Err(StopRequested.into());
        }
        gate.wait_if_needed(event.timestamp_us());
        shared
            .queue
            .send(QueueMessage::Event(event))
            .map_err(|_| anyhow::anyhow!("event queue disconnected"))
    };

    match spec.entry.parser {
        ParserKind::PcapGps => {
            let mut reader = PacketCaptureReader::new(spec.offset_us);
            let mut parser = GpsSentenceParser::new();
            reader.read(stream, |timestamp_us, kind, payload| {
                if kind != PayloadKind::Gps {
                    return Ok(());
                }
                let Some(fix) = parser.parse(timestamp_us, payload) else {
                    return Ok(());
                };
                emit(
                    Event::Gps {
                        entity: entity.to_string(),
                        timestamp_us: fix.timestamp_us,
                        lat: fix.lat,
                        lon: fix.lon,
                        speed_knots: fix.speed_knots,
                        course_deg: fix.course_deg,
                        magnetic_variation: fix.magnetic_variation,
                        utc_time: fix.utc_time,
                    },
                )
            })?;
            tracing::info!(entity, emitted = parser.stats.emitted, duplicates = parser.stats.duplicates, "GPS stream done");
        }
        ParserKind::PcapLidar => {
            let mut reader = PacketCaptureReader::new(spec.offset_us);
            let mut parser = LidarPacketParser::new();
            reader.read(stream, |timestamp_us, kind, payload| {
                if kind != PayloadKind::Lidar {
                    return Ok(());
                }
                let Some(frame) = parser.parse(timestamp_us, payload)? else {
                    return Ok(());
                };
                emit(
                    Event::LidarFrame {
                        entity: entity.to_string(),
                        timestamp_us: frame.timestamp_us,
                        positions: frame.positions,
                        colors: frame.colors,
                    },
                )
            })?;
            tracing::info!(entity, packets = parser.packets, frames = parser.frames, "LiDAR stream done");
        }
        ParserKind::Riff => {
            let db = spec
                .signal_db
                .as_deref()
                .context("signal stream has no loaded database")?;
            let selection = spec
                .selection
                .as_ref()
                .context("signal stream has no selection")?;
            if selection.is_empty() {
                tracing::info!(entity, "no signals selected; stream skipped");
                return Ok(());
            }
            let mut reader = SignalContainerReader::new(db, selection, spec.offset_us);
            reader.read(stream, |timestamp_us, name, value| {
                emit(
                    Event::Signal {
                        entity: entity.to_string(),
                        timestamp_us,
                        name: name.to_string(),
                        value,
                    },
                )
            })?;
            tracing::info!(entity, emitted = reader.stats.emitted, throttled = reader.stats.throttled, "signal stream done");
        }
        ParserKind::Video => {
            let factory = spec
                .decoder_factory
                .as_ref()
                .context("no video decoder available for this deployment")?;
            let mut decoder = factory(stream)?;
            let mut reader = VideoReader::new(spec.offset_us);
            reader.read(decoder.as_mut(), |timestamp_us, image_bytes| {
                emit(
                    Event::VideoFrame {
                        entity: entity.to_string(),
                        timestamp_us,
                        image_bytes,
                    },
                )
            })?;
            tracing::info!(entity, kept = reader.stats.frames_kept, "video stream done");
        }
    }
    Ok(())
}
