//! Tracing setup for the CLI.
//!
//! Terminal output belongs to the progress UI, so the subscriber writes to
//! the log file under `.foreman/` and only mirrors to stderr in verbose
//! mode. `RUST_LOG` overrides the default filter either way.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop; hold it for the life of the command.
///
/// Events use short targets (`run`, `plan`, `worker`, ...) rather than
/// module paths, so the default filter is a plain level.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let mut guard = None;
    let file_layer = log_file.and_then(|path| {
        let dir = path.parent().filter(|dir| dir.exists())?;
        let name = path.file_name()?;
        let (writer, g) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        guard = Some(g);
        Some(fmt::layer().with_writer(writer).with_ansi(false).compact())
    });
    let stderr_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr).compact());

    // try_init: tests may re-enter; the first subscriber wins.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
    guard
}
