//! Process-wide `tracing` subscriber
//!
//! Events go to stderr and, when `logging.file_output` is set, to a daily
//! rotated file written by a background thread. `RUST_LOG` takes precedence
//! over the configured level.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::{LogLevel, LoggingConfig};
use crate::error::{OwlError, OwlResult};

/// Filter used when `RUST_LOG` is not set
pub fn default_directives(level: LogLevel) -> String {
    format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn")
}

/// Install the global subscriber
///
/// Keep the returned guard alive for the lifetime of the process, otherwise
/// buffered file output is lost.
pub fn init(config: &LoggingConfig) -> OwlResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    let (file_layer, guard) = if config.file_output {
        let (writer, guard) = file_writer(Path::new(&config.file_path))?;
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| OwlError::Config(format!("Failed to initialize logging: {e}")))?;

    Ok(guard)
}

fn file_writer(
    path: &Path,
) -> OwlResult<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| OwlError::Config(format!("Invalid log file path: {}", path.display())))?;

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_start_with_level() {
        assert!(default_directives(LogLevel::Debug).starts_with("debug,"));
        assert!(EnvFilter::try_new(default_directives(LogLevel::Warn)).is_ok());
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("owl.log");
        let (_writer, _guard) = file_writer(&path).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_file_writer_rejects_directory_path() {
        assert!(file_writer(Path::new("/")).is_err());
    }
}
