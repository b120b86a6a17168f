use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "PERISCOPE_LOG_FILTER";
const TRACE_DEPS_ENV: &str = "PERISCOPE_TRACE_DEPS";

/// Module-path targets of our own crates; events from these follow `--log-level`.
const OWN_CRATES: &[&str] = &["periscope", "periscope_session"];

/// The webrtc-rs stack, one crate per protocol layer. At trace these emit
/// per-packet events for every camera.
const WEBRTC_LAYERS: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_mdns",
    "webrtc_dtls",
    "webrtc_srtp",
    "webrtc_sctp",
    "webrtc_data",
    "interceptor",
    "rtp",
    "rtcp",
    "sdp",
    "turn",
    "stun",
];

/// The signaling HTTP client stack.
const HTTP_CLIENT: &[&str] = &["reqwest", "hyper", "h2", "rustls", "mio"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {} value {filter:?}: {reason}", LOG_FILTER_ENV)]
    Filter { filter: String, reason: String },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber once; later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let override_filter = std::env::var(LOG_FILTER_ENV).ok();
    let (filter, throttled) = match override_filter {
        Some(raw) => (parse_override(&raw)?, false),
        None => {
            let directives = default_directives(config.level, dependency_traces_allowed());
            let throttled = directives.throttled;
            (EnvFilter::new(directives.render()), throttled)
        }
    };

    let (writer, guard) = open_writer(config.file.as_deref())?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;
    let _ = GUARD.set(guard);

    if throttled {
        tracing::info!(
            target = "periscope::telemetry",
            "webrtc and http client traces capped at info; set {TRACE_DEPS_ENV}=1 to see them"
        );
    }
    Ok(())
}

fn open_writer(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let Some(path) = file else {
        return Ok(tracing_appender::non_blocking(std::io::stderr()));
    };
    let io_error = |source| InitError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error)?;
    Ok(tracing_appender::non_blocking(file))
}

fn parse_override(raw: &str) -> Result<EnvFilter, InitError> {
    EnvFilter::try_new(raw).map_err(|err| InitError::Filter {
        filter: raw.to_string(),
        reason: err.to_string(),
    })
}

fn dependency_traces_allowed() -> bool {
    matches!(
        std::env::var(TRACE_DEPS_ENV).as_deref(),
        Ok(value) if !value.is_empty() && value != "0"
    )
}

struct Directives {
    parts: Vec<String>,
    throttled: bool,
}

impl Directives {
    fn render(&self) -> String {
        self.parts.join(",")
    }
}

/// Everything else stays at `info` (or quieter); our crates follow `level`.
/// At trace the webrtc layers and the HTTP client are pinned to `info`
/// unless dependency traces were asked for.
fn default_directives(level: LogLevel, allow_deps: bool) -> Directives {
    let global = level.min(LogLevel::Info);
    let mut parts = vec![global.as_str().to_string()];
    if level > global {
        parts.extend(OWN_CRATES.iter().map(|krate| format!("{krate}={}", level.as_str())));
    }

    let throttled = level == LogLevel::Trace && !allow_deps;
    if throttled {
        parts.extend(
            WEBRTC_LAYERS
                .iter()
                .chain(HTTP_CLIENT)
                .map(|krate| format!("{krate}=info")),
        );
    } else if level == LogLevel::Trace {
        parts.extend(WEBRTC_LAYERS.iter().map(|krate| format!("{krate}=trace")));
    }

    Directives { parts, throttled }
}
