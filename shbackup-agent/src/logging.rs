//! Log sinks: console plus append-only `activity.log` and `error.log`.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const ACTIVITY_LOG: &str = "activity.log";
pub const ERROR_LOG: &str = "error.log";

pub struct LogSinks {
    activity: Arc<File>,
    error: Arc<File>,
}

impl LogSinks {
    pub fn open(log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        Ok(Self {
            activity: Arc::new(append(&log_dir.join(ACTIVITY_LOG))?),
            error: Arc::new(append(&log_dir.join(ERROR_LOG))?),
        })
    }
}

fn append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Build the subscriber. Every event at INFO or above goes to the activity
/// log, errors also go to the error log.
pub fn subscriber(
    console: bool,
    sinks: Option<LogSinks>,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    let console_layer = console.then(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt::layer().with_writer(std::io::stderr).with_filter(filter)
    });

    let (activity_layer, error_layer) = match sinks {
        Some(sinks) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(sinks.activity)
                    .with_filter(LevelFilter::INFO),
            ),
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(sinks.error)
                    .with_filter(LevelFilter::ERROR),
            ),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(activity_layer)
        .with(error_layer)
}

/// Install the process-wide subscriber. Falls back to console only when the
/// log directory cannot be opened.
pub fn init(log_dir: &Path) {
    match LogSinks::open(log_dir) {
        Ok(sinks) => subscriber(true, Some(sinks)).init(),
        Err(e) => {
            subscriber(true, None).init();
            warn!(dir = %log_dir.display(), error = %e, "Log files unavailable, logging to console only");
        }
    }
}
