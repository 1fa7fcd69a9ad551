use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use session2rrd::cli::{Cli, Commands};
use session2rrd::config::SessionConfig;
use session2rrd::progress::TracingPublisher;
use session2rrd::session::{run_session, SessionOptions};
use session2rrd::storage::LocalBlobStore;
use session2rrd::{inspect, schema};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            out_dir,
            data_root,
            metadata,
            user,
            project,
            server_url,
            segment_secs,
            queue_capacity,
            progress,
        } => {
            anyhow::ensure!(segment_secs > 0.0, "segment-secs must be > 0");
            let document = std::fs::read_to_string(&config)
                .with_context(|| format!("failed to read {config}"))?;
            let session_config = SessionConfig::from_json(&document)?;

            let options = SessionOptions {
                save_dir: out_dir.into(),
                session_key: format!("{user}/{project}"),
                user_id: user,
                project_id: project,
                server_url,
                metadata_key: metadata,
                segment_duration_us: (segment_secs * 1e6) as i64,
                queue_capacity,
                show_progress: progress,
            };
            let store = Arc::new(LocalBlobStore::new(data_root));
            let mut publisher = TracingPublisher;

            // Video decoding is deployment-specific; no decoder ships with
            // the CLI, so video entries terminate their worker with a log.
            let stats = run_session(
                &session_config,
                &options,
                store,
                &mut publisher,
                None,
                Arc::new(AtomicBool::new(false)),
            )?;
            println!(
                "Done: {} events across {} segments (gps={} lidar={} video={} signals={})",
                stats.events,
                stats.segments,
                stats.gps_fixes,
                stats.lidar_frames,
                stats.video_frames,
                stats.signal_values
            );
            Ok(())
        }
        Commands::Inspect { file } => inspect::inspect_file(&file),
        Commands::Schema {} => schema::print_schema(),
    }
}
