use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "support-tracker",
    version,
    about = "Reconciling issue-ingestion service"
)]
pub struct Cli {
    /// Port to bind on 127.0.0.1 (0 picks an ephemeral port).
    #[arg(long, env = "SUPPORT_TRACKER_PORT", default_value_t = 0)]
    pub port: u16,

    /// Directory holding settings, secrets and the run report. Defaults to
    /// the XDG config/state locations.
    #[arg(long, env = "SUPPORT_TRACKER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log at debug level (also switched on by `isVerbose` in settings).
    #[arg(long, env = "SUPPORT_TRACKER_VERBOSE", default_value_t = false)]
    pub verbose: bool,

    /// Run a single query job with the settings defaults, print the result
    /// as JSON, and exit instead of serving the control plane.
    #[arg(long, default_value_t = false)]
    pub once: bool,
}
