use std::{
    cmp::Reverse,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use tracing::warn;
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_subscriber::{EnvFilter, Layer, filter::LevelFilter, fmt, prelude::*};

const ERROR_LOG_SUFFIX: &str = "_error.log";
const MAX_RETAINED_LOGS: usize = 14;

static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Owns the error log for the lifetime of the process. Dropping it flushes
/// buffered records and closes the file.
pub struct LogGuard {
    path: PathBuf,
    _worker: WorkerGuard,
}

impl LogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Installs stderr logging (filtered by `RUST_LOG`, default `info`) and a JSON
/// error log at `<log_dir>/<DD-MM-YYYY>_error.log`.
pub fn init(log_dir: &Path) -> Result<LogGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let path = log_dir.join(error_log_name(Local::now().date_naive()));
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let (file_writer, worker) = non_blocking::NonBlockingBuilder::default()
        .lossy(false)
        .finish(file);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);
    let file_layer = fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let installed = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed {
        install_panic_hook();
    }

    if let Err(err) = enforce_retention(log_dir, &path) {
        warn!("failed to enforce log retention in {}: {err:#}", log_dir.display());
    }

    Ok(LogGuard {
        path,
        _worker: worker,
    })
}

fn error_log_name(day: NaiveDate) -> String {
    format!("{}{}", day.format("%d-%m-%Y"), ERROR_LOG_SUFFIX)
}

/// Keeps the newest error logs and removes the rest. The active file is
/// never removed.
fn enforce_retention(log_dir: &Path, active: &Path) -> Result<()> {
    let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(log_dir)
        .with_context(|| format!("failed to inspect log directory {}", log_dir.display()))?
    {
        let entry = entry.with_context(|| {
            format!(
                "failed to inspect log directory entry in {}",
                log_dir.display()
            )
        })?;
        let path = entry.path();
        if !path.is_file() || path == active {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        if !file_name.ends_with(ERROR_LOG_SUFFIX) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, path));
    }

    entries.sort_by_key(|(modified, _)| Reverse(*modified));
    let keep = MAX_RETAINED_LOGS.saturating_sub(1);
    for (_, path) in entries.into_iter().skip(keep) {
        if let Err(err) = fs::remove_file(&path) {
            warn!("failed to remove expired log {}: {err}", path.display());
        }
    }

    Ok(())
}

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                tracing::error!(
                    target: "panic",
                    file = location.file(),
                    line = location.line(),
                    message = %info
                );
            } else {
                tracing::error!(target: "panic", message = %info);
            }
            default_hook(info);
        }));
    });
}
