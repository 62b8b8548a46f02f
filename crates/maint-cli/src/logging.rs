use maint_core::config::Config;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Per-host log file `<log_dir>/system-update/<host>.log`, if the config
/// at `config_path` names a log directory.
pub fn host_log_file(config_path: &Path, host: &str) -> Option<PathBuf> {
    let config = Config::load(config_path).ok()?;
    let dir = config.dirs.log_dir?;
    Some(dir.join("system-update").join(format!("{host}.log")))
}

/// Install the global subscriber: stderr always, plus `file` when given.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init(default_level: tracing::Level, file: Option<PathBuf>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::from_default_env().add_directive(default_level.into());
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match file.and_then(|path| open_appender(&path)) {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn open_appender(path: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path.parent()?;
    let name = path.file_name()?;
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("warning: cannot create log directory {}: {e}", dir.display());
        return None;
    }
    let appender = tracing_appender::rolling::never(dir, name);
    Some(tracing_appender::non_blocking(appender))
}
