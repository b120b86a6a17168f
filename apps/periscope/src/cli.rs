use std::path::PathBuf;

use clap::{Args, Parser};

use crate::config::{AppConfig, NO_ICE_SERVERS};
use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "periscope",
    about = "Keep receive-only WebRTC camera sessions alive against a go2rtc signaling gateway",
    version
)]
pub struct Cli {
    #[arg(
        long,
        value_name = "URL",
        help = "Base URL of the signaling gateway [default: http://localhost:1984]"
    )]
    pub signaling_url: Option<String>,

    #[arg(
        long = "source",
        value_name = "ID",
        help = "Camera source to connect; repeat for several. Overrides --total-cameras"
    )]
    pub sources: Vec<String>,

    #[arg(long, value_name = "N", help = "Connect <prefix>1 through <prefix>N")]
    pub total_cameras: Option<u32>,

    #[arg(long, value_name = "PREFIX", help = "Source id prefix used with --total-cameras")]
    pub source_prefix: Option<String>,

    #[arg(
        long = "ice-server",
        value_name = "URL",
        help = "STUN/TURN server URL; repeat for several"
    )]
    pub ice_servers: Vec<String>,

    #[arg(
        long,
        conflicts_with = "ice_servers",
        help = "Use no ICE servers (host candidates only)"
    )]
    pub no_ice_servers: bool,

    #[arg(long, value_name = "N", help = "Negotiation attempts before giving up on a source")]
    pub max_attempts: Option<u32>,

    #[arg(long, value_name = "MS", help = "How long to wait for ICE gathering")]
    pub gathering_timeout_ms: Option<u64>,

    #[arg(long, value_name = "SECS", help = "Interval between grid status summaries")]
    pub summary_interval_secs: Option<u64>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    /// Command-line flags win over environment and `.env` values.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.signaling_url {
            config.signaling_url = url.clone();
        }
        if !self.sources.is_empty() {
            config.sources = Some(self.sources.join(","));
        } else if self.total_cameras.is_some() || self.source_prefix.is_some() {
            // a numbered grid asked for on the command line replaces any loaded list
            config.sources = None;
        }
        if let Some(total) = self.total_cameras {
            config.total_cameras = total;
        }
        if let Some(prefix) = &self.source_prefix {
            config.source_prefix = prefix.clone();
        }
        if self.no_ice_servers {
            config.ice_servers = Some(NO_ICE_SERVERS.to_string());
        } else if !self.ice_servers.is_empty() {
            config.ice_servers = Some(self.ice_servers.join(","));
        }
        if let Some(max) = self.max_attempts {
            config.max_attempts = max;
        }
        if let Some(timeout) = self.gathering_timeout_ms {
            config.gathering_timeout_ms = timeout;
        }
        if let Some(interval) = self.summary_interval_secs {
            config.summary_interval_secs = interval;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "PERISCOPE_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "PERISCOPE_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
