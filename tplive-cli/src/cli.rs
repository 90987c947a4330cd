use clap::Parser;
use std::path::PathBuf;

use crate::config::LogFormat;

/// Touch Portal plugin process for TikTok LIVE.
///
/// Reads host commands as JSON lines on stdin and writes state updates and
/// events as JSON lines on stdout. Logs go to stderr.
#[derive(Parser, Debug, Default)]
#[command(name = "tplive", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to <config dir>/tplive/config.toml when present)
    #[arg(short, long, env = "TPLIVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// WebSocket URL of the live event relay, `{account}` is replaced by the username
    #[arg(long, env = "TPLIVE_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Log filter directive (e.g. "tiktok_live=debug")
    #[arg(long, env = "TPLIVE_LOG_FILTER")]
    pub log_filter: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to a daily rotated file at this path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Disable the follower count lookup
    #[arg(long)]
    pub no_followers: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
