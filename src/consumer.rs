//! Segmented event consumer: drains the shared queue into per-segment Rerun
//! recordings and publishes progress after each finished segment.
//!
//! The consumer owns all Rerun state. Recordings are cut on fixed windows of
//! session time; whenever an event crosses the current window's end, the open
//! recording is flushed, announced over the progress topic, and a fresh one
//! is started with the viewer layout re-applied (trajectories, dashboards and
//! series styling do not carry across recordings on their own).

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::event::{format_mmss, Event, QueueMessage};
use crate::progress::{artifact_url, complete_topic, progress_topic, ProgressMessage, ProgressPublisher};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const TIMELINE: &str = "session_time";

fn gps_color() -> rerun::Color {
    rerun::Color::from_rgb(255, 0, 0)
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Directory the per-segment .rrd files are written into.
    pub save_dir: PathBuf,
    /// Recording id prefix, typically `{user}/{project}`.
    pub session_key: String,
    pub user_id: String,
    pub project_id: String,
    /// Base URL the frontend resolves artifact paths against.
    pub server_url: String,
    pub segment_duration_us: i64,
    /// Number of Finished sentinels to expect before the run is complete.
    pub worker_count: usize,
    pub show_progress: bool,
}

/// Half-open window `[start_us, end_us)` of session time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWindow {
    pub index: u64,
    pub start_us: i64,
    pub end_us: i64,
}

impl SegmentWindow {
    pub fn first(duration_us: i64) -> Self {
        Self {
            index: 0,
            start_us: 0,
            end_us: duration_us,
        }
    }

    pub fn next(&self, duration_us: i64) -> Self {
        Self {
            index: self.index + 1,
            start_us: self.end_us,
            end_us: self.end_us + duration_us,
        }
    }

    pub fn contains(&self, timestamp_us: i64) -> bool {
        timestamp_us < self.end_us
    }

    /// `mm:ss ~ mm:ss` over the given end (window end for full segments, the
    /// last observed event time for the final one).
    pub fn label(&self, end_us: i64) -> String {
        format!(
            "{} ~ {}",
            format_mmss(self.start_us as f64 * 1e-6),
            format_mmss(end_us as f64 * 1e-6)
        )
    }
}

#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub events: u64,
    pub gps_fixes: u64,
    pub lidar_frames: u64,
    pub video_frames: u64,
    pub signal_values: u64,
    pub segments: u64,
}

pub struct SegmentedEventConsumer {
    options: ConsumerOptions,
    window: SegmentWindow,
    rec: Option<rerun::RecordingStream>,
    // Accumulated viewer state, re-logged into every new segment recording.
    trajectories: HashMap<String, Vec<[f64; 2]>>,
    dashboards: HashMap<String, HashMap<String, f64>>,
    styled_series: HashSet<String>,
    last_elapsed_us: i64,
    pub stats: ConsumerStats,
}

impl SegmentedEventConsumer {
    pub fn new(options: ConsumerOptions) -> Self {
        let window = SegmentWindow::first(options.segment_duration_us);
        Self {
            options,
            window,
            rec: None,
            trajectories: HashMap::new(),
            dashboards: HashMap::new(),
            styled_series: HashSet::new(),
            last_elapsed_us: 0,
            stats: ConsumerStats::default(),
        }
    }

    /// Drain the queue until every worker has sent its sentinel, then close
    /// the final segment and announce completion.
    pub fn run(
        &mut self,
        queue: &flume::Receiver<QueueMessage>,
        publisher: &mut dyn ProgressPublisher,
    ) -> Result<()> {
        let pb = if self.options.show_progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::with_template("{spinner} {pos} msgs").unwrap());
            pb
        } else {
            ProgressBar::hidden()
        };

        self.open_segment()?;
        let run_started = Instant::now();
        let mut finished_workers = 0;

        loop {
            match queue.recv_timeout(RECV_TIMEOUT) {
                Ok(QueueMessage::Event(event)) => {
                    if !self.window.contains(event.timestamp_us()) {
                        self.finish_segment(publisher, self.window.end_us)?;
                        self.window = self.window.next(self.options.segment_duration_us);
                        self.open_segment()?;
                    }
                    self.last_elapsed_us = self.last_elapsed_us.max(event.timestamp_us());
                    self.log_event(&event)?;
                    pb.inc(1);
                }
                Ok(QueueMessage::Finished { entity }) => {
                    finished_workers += 1;
                    tracing::info!(entity = %entity, finished_workers, expected = self.options.worker_count, "worker stream ended");
                    if finished_workers >= self.options.worker_count {
                        break;
                    }
                }
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Err(flume::RecvTimeoutError::Disconnected) => {
                    tracing::warn!("event queue disconnected before all workers finished");
                    break;
                }
            }
        }

        self.finish_segment(publisher, self.last_elapsed_us)?;
        publisher.publish(
            &complete_topic(&self.options.user_id, &self.options.project_id),
            &ProgressMessage::Complete,
        )?;
        publisher.disconnect()?;
        pb.finish_and_clear();

        tracing::info!(
            events = self.stats.events,
            gps_fixes = self.stats.gps_fixes,
            lidar_frames = self.stats.lidar_frames,
            video_frames = self.stats.video_frames,
            signal_values = self.stats.signal_values,
            segments = self.stats.segments,
            elapsed = ?run_started.elapsed(),
            "session complete"
        );
        Ok(())
    }

    /// Start the recording for the current window and re-apply the viewer
    /// layout accumulated so far.
    fn open_segment(&mut self) -> Result<()> {
        let path = self.options.save_dir.join(format!("{}.rrd", self.window.index));
        let rec_id = format!("{}:segment:{}", self.options.session_key, self.window.index);
        let rec = rerun::RecordingStreamBuilder::new(rec_id)
            .save(&path)
            .with_context(|| format!("failed to open recording {}", path.display()))?;
        tracing::info!(segment = self.window.index, path = %path.display(), "segment recording opened");

        rec.log_static("world", &rerun::ViewCoordinates::RIGHT_HAND_Z_UP())?;
        self.styled_series.clear();

        rec.set_timestamp_secs_since_epoch(TIMELINE, self.window.start_us as f64 * 1e-6);
        for (entity, trajectory) in &self.trajectories {
            if !trajectory.is_empty() {
                rec.log(format!("world/{entity}/trajectory"), &trajectory_strip(trajectory))?;
            }
        }
        let dashboard_entities: Vec<String> = self.dashboards.keys().cloned().collect();
        self.rec = Some(rec);
        for entity in dashboard_entities {
            self.log_dashboard(&entity)?;
        }
        Ok(())
    }

    /// Flush and announce the recording for the current window.
    fn finish_segment(&mut self, publisher: &mut dyn ProgressPublisher, end_us: i64) -> Result<()> {
        if let Some(rec) = self.rec.take() {
            rec.flush_blocking();
        }
        self.stats.segments += 1;

        let message = ProgressMessage::Progressing {
            segment_index: self.window.index,
            artifact_url: artifact_url(
                &self.options.server_url,
                &self.options.user_id,
                &self.options.project_id,
                self.window.index,
            ),
            segment_label: self.window.label(end_us),
        };
        publisher.publish(
            &progress_topic(&self.options.user_id, &self.options.project_id),
            &message,
        )?;
        tracing::info!(segment = self.window.index, label = self.window.label(end_us), "segment published");
        Ok(())
    }

    fn recording(&self) -> Result<&rerun::RecordingStream> {
        self.rec.as_ref().context("no open segment recording")
    }

    fn log_event(&mut self, event: &Event) -> Result<()> {
        self.stats.events += 1;
        self.recording()?
            .set_timestamp_secs_since_epoch(TIMELINE, event.timestamp_us() as f64 * 1e-6);

        match event {
            Event::Gps { entity, lat, lon, .. } => {
                self.stats.gps_fixes += 1;
                let trajectory = self.trajectories.entry(entity.clone()).or_default();
                trajectory.push([*lat, *lon]);
                let trajectory = trajectory.clone();

                let rec = self.recording()?;
                rec.log(
                    format!("world/{entity}"),
                    &rerun::GeoPoints::from_lat_lon([[*lat, *lon]])
                        .with_radii([rerun::Radius::new_ui_points(8.0)])
                        .with_colors([gps_color()]),
                )?;
                rec.log(format!("world/{entity}/trajectory"), &trajectory_strip(&trajectory))?;
            }
            Event::LidarFrame { entity, positions, colors, .. } => {
                self.stats.lidar_frames += 1;
                self.recording()?.log(
                    format!("world/{entity}"),
                    &rerun::Points3D::new(positions.iter().copied())
                        .with_colors(colors.iter().map(|[r, g, b]| rerun::Color::from_rgb(*r, *g, *b)))
                        .with_radii([rerun::Radius::new_ui_points(1.0)]),
                )?;
            }
            Event::VideoFrame { entity, image_bytes, .. } => {
                self.stats.video_frames += 1;
                self.recording()?.log(
                    format!("world/{entity}"),
                    &rerun::EncodedImage::from_file_contents(image_bytes.clone())
                        .with_media_type(rerun::MediaType::jpeg()),
                )?;
            }
            Event::Signal { entity, name, value, .. } => {
                self.stats.signal_values += 1;
                self.log_signal(entity, name, *value)?;
            }
        }
        Ok(())
    }

    fn log_signal(&mut self, entity: &str, name: &str, value: f64) -> Result<()> {
        let chart_path = format!("{entity}/charts/{name}");
        let rec = self.rec.as_ref().context("no open segment recording")?;

        // Series styling is static per recording; log it once per segment.
        if self.styled_series.insert(chart_path.clone()) {
            rec.log_static(
                chart_path.clone(),
                &rerun::SeriesLines::new()
                    .with_colors([signal_color(name)])
                    .with_names([name])
                    .with_widths([2.0]),
            )?;
        }
        rec.log(chart_path, &rerun::Scalars::new([value]))?;

        self.dashboards
            .entry(entity.to_string())
            .or_default()
            .insert(name.to_string(), value);
        self.log_dashboard(entity)
    }

    fn log_dashboard(&self, entity: &str) -> Result<()> {
        let text = self
            .dashboards
            .get(entity)
            .map(|signals| render_dashboard(signals))
            .unwrap_or_else(|| "*No signals*".to_string());
        self.recording()?.log(
            format!("{entity}/dashboard"),
            &rerun::TextDocument::from_markdown(text),
        )?;
        Ok(())
    }
}

fn trajectory_strip(points: &[[f64; 2]]) -> rerun::GeoLineStrings {
    rerun::GeoLineStrings::from_lat_lon([points.to_vec()])
        .with_radii([rerun::Radius::new_ui_points(1.5)])
        .with_colors([gps_color()])
}

/// Markdown dashboard: one `**name**: value` line per signal, blank line
/// between entries, sorted case-insensitively, precision tiered by magnitude.
fn render_dashboard(signals: &HashMap<String, f64>) -> String {
    let mut entries: Vec<(&String, &f64)> = signals.iter().collect();
    entries.sort_by_key(|(name, _)| name.to_lowercase());
    entries
        .iter()
        .map(|(name, value)| format!("**{name}**: `{}`", format_value(**value)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 100.0 {
        format!("{value:.1}")
    } else if magnitude >= 10.0 {
        format!("{value:.2}")
    } else if magnitude >= 1.0 {
        format!("{value:.3}")
    } else {
        format!("{value:.4}")
    }
}

/// Stable per-signal chart color derived from the name, floored away from
/// black so every series stays readable on the dark theme.
fn signal_color(name: &str) -> rerun::Color {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    let h = hasher.finish();
    let channel = |shift: u32| ((h >> shift) as u8).max(64);
    rerun::Color::from_rgb(channel(0), channel(8), channel(16))
}
