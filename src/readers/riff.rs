//! Signal container reader: RIFF-framed CAN message log.
//!
//! The container opens with a RIFF header and a preamble carrying the
//! absolute timestamp offset of the recording. Signal chunks hold one raw
//! CAN message each; every other chunk id is skipped. All chunks are padded
//! to even length. Records are batched before decoding, and decoded values
//! are throttled per signal name in stream time.

use std::collections::HashMap;
use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::signals::{SignalDatabase, SignalSelection};

const RIFF_TAG: &[u8; 4] = b"RIFF";
// "sigi" in little-endian chunk-id form.
const SIGNAL_CHUNK_ID: u32 = 0x6967_6973;
const PREAMBLE_SKIP_LEN: usize = 8;
const TRAILING_SKIP_LEN: usize = 12;
const SUBHEADER_LEN: usize = 18;
const BATCH_MAX_RECORDS: usize = 100;
const BATCH_MAX_AGE: Duration = Duration::from_millis(100);
const THROTTLE_INTERVAL_US: i64 = 100_000;

#[derive(Debug, Default)]
pub struct RiffStats {
    pub chunks: u64,
    pub signal_chunks: u64,
    pub skipped_chunks: u64,
    pub decoded_messages: u64,
    pub decode_failures: u64,
    pub emitted: u64,
    pub throttled: u64,
}

/// One undecoded record held back for batch decoding.
struct RawRecord {
    timestamp_us: i64,
    message_id: u32,
    payload: Vec<u8>,
}

pub struct SignalContainerReader<'a> {
    db: &'a dyn SignalDatabase,
    selection: &'a SignalSelection,
    file_offset_us: i64,
    last_emit_us: HashMap<String, i64>,
    pub stats: RiffStats,
}

impl<'a> SignalContainerReader<'a> {
    pub fn new(db: &'a dyn SignalDatabase, selection: &'a SignalSelection, file_offset_us: i64) -> Self {
        Self {
            db,
            selection,
            file_offset_us,
            last_emit_us: HashMap::new(),
            stats: RiffStats::default(),
        }
    }

    /// Read the whole container, invoking the handler with
    /// `(relative timestamp µs, signal name, physical value)` for every
    /// selected, non-throttled value. A handler error aborts the read.
    pub fn read(
        &mut self,
        mut stream: impl Read,
        mut handler: impl FnMut(i64, &str, f64) -> Result<()>,
    ) -> Result<()> {
        let timestamp_offset = read_preamble(&mut stream)?;

        let mut first_timestamp_us: Option<i64> = None;
        let mut batch: Vec<RawRecord> = Vec::with_capacity(BATCH_MAX_RECORDS);
        let mut batch_started = Instant::now();

        let mut chunk_header = [0u8; 8];
        loop {
            if !read_exact_or_eof(&mut stream, &mut chunk_header)? {
                break;
            }
            self.stats.chunks += 1;
            let chunk_id = u32::from_le_bytes([
                chunk_header[0],
                chunk_header[1],
                chunk_header[2],
                chunk_header[3],
            ]);
            let chunk_size = u32::from_le_bytes([
                chunk_header[4],
                chunk_header[5],
                chunk_header[6],
                chunk_header[7],
            ]) as usize;
            // RIFF pads every chunk body to even length.
            let padded_size = chunk_size + chunk_size % 2;

            if chunk_id != SIGNAL_CHUNK_ID {
                self.stats.skipped_chunks += 1;
                skip_bytes(&mut stream, padded_size)
                    .context("truncated chunk body")?;
                continue;
            }
            self.stats.signal_chunks += 1;

            let mut body = vec![0u8; padded_size];
            stream
                .read_exact(&mut body)
                .context("truncated signal chunk body")?;
            let (message_id, time_delta, payload) = parse_signal_chunk(&body, chunk_size)?;

            if !self.selection.contains_message(message_id) {
                continue;
            }
            // Stream zero is the first record of a selected message.
            let absolute_us = timestamp_offset as i64 + time_delta as i64;
            let first = *first_timestamp_us.get_or_insert(absolute_us);
            let timestamp_us = absolute_us - first + self.file_offset_us;
            batch.push(RawRecord {
                timestamp_us,
                message_id,
                payload: payload.to_vec(),
            });

            if batch.len() >= BATCH_MAX_RECORDS || batch_started.elapsed() >= BATCH_MAX_AGE {
                self.flush_batch(&mut batch, &mut handler)?;
                batch_started = Instant::now();
            }
        }
        self.flush_batch(&mut batch, &mut handler)?;
        Ok(())
    }

    fn flush_batch(
        &mut self,
        batch: &mut Vec<RawRecord>,
        handler: &mut impl FnMut(i64, &str, f64) -> Result<()>,
    ) -> Result<()> {
        for record in batch.drain(..) {
            let values = match self.db.decode(record.message_id, &record.payload) {
                Ok(values) => values,
                Err(err) => {
                    self.stats.decode_failures += 1;
                    tracing::warn!(
                        message_id = record.message_id,
                        error = %err,
                        "message decode failure; record dropped"
                    );
                    continue;
                }
            };
            self.stats.decoded_messages += 1;
            for (name, value) in values {
                if !self.selection.allows(record.message_id, &name) {
                    continue;
                }
                // Cap each signal at ten values per second of stream time.
                if let Some(last) = self.last_emit_us.get(&name)
                    && record.timestamp_us - last < THROTTLE_INTERVAL_US
                {
                    self.stats.throttled += 1;
                    continue;
                }
                self.last_emit_us.insert(name.clone(), record.timestamp_us);
                self.stats.emitted += 1;
                handler(record.timestamp_us, &name, value)?;
            }
        }
        Ok(())
    }
}

/// RIFF header plus the recording preamble. Returns the absolute timestamp
/// offset in microseconds. A wrong container tag is fatal.
fn read_preamble(stream: &mut impl Read) -> Result<u64> {
    let mut header = [0u8; 12];
    stream
        .read_exact(&mut header)
        .context("invalid container: header shorter than 12 bytes")?;
    if &header[0..4] != RIFF_TAG {
        anyhow::bail!("invalid container: expected RIFF tag");
    }

    skip_bytes(stream, PREAMBLE_SKIP_LEN).context("truncated container preamble")?;
    let mut offset_bytes = [0u8; 8];
    stream
        .read_exact(&mut offset_bytes)
        .context("truncated container preamble")?;
    let timestamp_offset = u64::from_le_bytes(offset_bytes);

    // Checksum is carried by the format but not validated here.
    skip_bytes(stream, 2 + TRAILING_SKIP_LEN).context("truncated container preamble")?;
    Ok(timestamp_offset)
}

/// Subheader (message id, two reserved fields, time delta) followed by the
/// payload length and payload bytes.
fn parse_signal_chunk(body: &[u8], chunk_size: usize) -> Result<(u32, u64, &[u8])> {
    if chunk_size < SUBHEADER_LEN + 4 {
        anyhow::bail!("signal chunk shorter than its subheader");
    }
    let message_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let time_delta = u64::from_le_bytes([
        body[10], body[11], body[12], body[13], body[14], body[15], body[16], body[17],
    ]);
    let payload_len = u32::from_le_bytes([body[18], body[19], body[20], body[21]]) as usize;
    let payload = body
        .get(SUBHEADER_LEN + 4..SUBHEADER_LEN + 4 + payload_len)
        .context("signal chunk payload exceeds chunk body")?;
    Ok((message_id, time_delta, payload))
}

/// Chunk-level summary of a container, collected without a signal database.
#[derive(Debug, Default)]
pub struct ContainerSummary {
    pub timestamp_offset_us: u64,
    pub chunks: u64,
    pub signal_chunks: u64,
    pub first_delta_us: Option<u64>,
    pub last_delta_us: Option<u64>,
    /// Records per message id, descending.
    pub message_counts: Vec<(u32, u64)>,
}

/// Walk a container and tally its chunks. Used by the inspect command.
pub fn scan(mut stream: impl Read) -> Result<ContainerSummary> {
    let mut summary = ContainerSummary {
        timestamp_offset_us: read_preamble(&mut stream)?,
        ..Default::default()
    };
    let mut counts: HashMap<u32, u64> = HashMap::new();

    let mut chunk_header = [0u8; 8];
    loop {
        if !read_exact_or_eof(&mut stream, &mut chunk_header)? {
            break;
        }
        summary.chunks += 1;
        let chunk_id = u32::from_le_bytes([
            chunk_header[0],
            chunk_header[1],
            chunk_header[2],
            chunk_header[3],
        ]);
        let chunk_size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as usize;
        let padded_size = chunk_size + chunk_size % 2;

        if chunk_id != SIGNAL_CHUNK_ID {
            skip_bytes(&mut stream, padded_size).context("truncated chunk body")?;
            continue;
        }
        summary.signal_chunks += 1;
        let mut body = vec![0u8; padded_size];
        stream
            .read_exact(&mut body)
            .context("truncated signal chunk body")?;
        let (message_id, time_delta, _) = parse_signal_chunk(&body, chunk_size)?;
        *counts.entry(message_id).or_insert(0) += 1;
        summary.first_delta_us.get_or_insert(time_delta);
        summary.last_delta_us = Some(time_delta);
    }

    summary.message_counts = counts.into_iter().collect();
    summary
        .message_counts
        .sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    Ok(summary)
}

fn skip_bytes(stream: &mut impl Read, count: usize) -> Result<()> {
    let skipped = std::io::copy(&mut stream.take(count as u64), &mut std::io::sink())?;
    if skipped as usize != count {
        anyhow::bail!("unexpected end of stream");
    }
    Ok(())
}

fn read_exact_or_eof(stream: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}
