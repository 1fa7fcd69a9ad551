//! Video frame reader: subsamples a decoded stream to the visualization
//! rate and re-encodes frames as scaled-down JPEGs.
//!
//! Actual codec work lives behind [`VideoDecoder`]; this module owns frame
//! selection, timestamp normalization and re-encoding.

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;

const TARGET_FPS: f64 = 5.0;
const RESIZE_FACTOR: f32 = 0.35;
const MIN_WIDTH: u32 = 200;
const MIN_HEIGHT: u32 = 150;
const JPEG_QUALITY: u8 = 75;

/// One raw frame out of the decoder: presentation timestamp plus packed
/// 8-bit RGB rows.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub pts_us: i64,
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Codec boundary. Implementations decode one container/stream and yield
/// frames in presentation order.
pub trait VideoDecoder: Send {
    /// Source frame rate in frames per second.
    fn frame_rate(&self) -> f64;

    /// Next frame, or None at end of stream.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;
}

#[derive(Debug, Default)]
pub struct VideoStats {
    pub frames_seen: u64,
    pub frames_kept: u64,
    pub frames_dropped: u64,
    pub frame_failures: u64,
}

pub struct VideoReader {
    file_offset_us: i64,
    pub stats: VideoStats,
}

impl VideoReader {
    pub fn new(file_offset_us: i64) -> Self {
        Self {
            file_offset_us,
            stats: VideoStats::default(),
        }
    }

    /// Drain the decoder, invoking the handler with
    /// `(relative timestamp µs, jpeg bytes)` for each kept frame. A handler
    /// error aborts the read; a per-frame conversion failure does not.
    pub fn read(
        &mut self,
        decoder: &mut dyn VideoDecoder,
        mut handler: impl FnMut(i64, Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let interval = keep_interval(decoder.frame_rate());
        let mut index: u64 = 0;
        let mut first_pts_us: Option<i64> = None;

        while let Some(frame) = decoder.next_frame()? {
            self.stats.frames_seen += 1;
            let position = index;
            index += 1;
            if position % interval != 0 {
                continue;
            }

            // Stream zero is the first kept frame.
            let first = *first_pts_us.get_or_insert(frame.pts_us);
            let timestamp_us = frame.pts_us - first + self.file_offset_us;
            if timestamp_us < 0 {
                self.stats.frames_dropped += 1;
                continue;
            }

            match encode_frame(&frame) {
                Ok(jpeg) => {
                    self.stats.frames_kept += 1;
                    handler(timestamp_us, jpeg)?;
                }
                Err(err) => {
                    self.stats.frame_failures += 1;
                    tracing::warn!(pts_us = frame.pts_us, error = %err, "frame conversion failure; frame skipped");
                }
            }
        }
        Ok(())
    }
}

/// Keep every n-th frame to land near the target rate. Sources at or below
/// the target keep everything.
fn keep_interval(source_fps: f64) -> u64 {
    ((source_fps / TARGET_FPS) as u64).max(1)
}

/// Scale down and re-encode one frame as JPEG.
fn encode_frame(frame: &DecodedFrame) -> Result<Vec<u8>> {
    let image = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone())
        .ok_or_else(|| anyhow::anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;

    let width = ((frame.width as f32 * RESIZE_FACTOR) as u32).max(MIN_WIDTH);
    let height = ((frame.height as f32 * RESIZE_FACTOR) as u32).max(MIN_HEIGHT);
    let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&resized)?;
    Ok(jpeg)
}
