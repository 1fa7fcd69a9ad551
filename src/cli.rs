use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "session2rrd", about = "Convert recorded multi-sensor sessions into segmented Rerun RRD files", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a session configuration into per-segment .rrd files
    Run {
        /// Path to the session configuration JSON
        config: String,
        /// Output directory for segment .rrd files
        out_dir: String,
        /// Root directory input file keys resolve against
        #[arg(long = "data-root", default_value = ".")]
        data_root: String,
        /// Recorder metadata document for per-sensor start offsets
        #[arg(long = "metadata")]
        metadata: Option<String>,
        /// User id used in progress topics and artifact URLs
        #[arg(long = "user", default_value = "local")]
        user: String,
        /// Project id used in progress topics and artifact URLs
        #[arg(long = "project", default_value = "session")]
        project: String,
        /// Base URL segment artifacts are served from
        #[arg(long = "server-url", default_value = "http://localhost:8080")]
        server_url: String,
        /// Segment duration in seconds
        #[arg(long = "segment-secs", default_value_t = 60.0)]
        segment_secs: f64,
        /// Bounded event queue capacity
        #[arg(long = "queue-capacity", default_value_t = 500)]
        queue_capacity: usize,
        /// Show progress spinner (enabled by default)
        #[arg(long = "progress", action = ArgAction::SetTrue, default_value_t = true)]
        progress: bool,
    },

    /// Probe an input file and report its kind and contents
    Inspect {
        /// Path to a .pcap or signal container file
        file: String,
    },

    /// Show supported parser → Rerun mappings
    Schema {},
}
