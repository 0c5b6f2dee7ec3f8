//! Logging setup and timing helpers.
//!
//! The detached check process runs with null stdio, so besides stderr the
//! subscriber can append to the file named by [`LOG_FILE_ENV`].

use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable naming an extra log file.
pub const LOG_FILE_ENV: &str = "EMAIL_REMINDER_LOG_FILE";

/// Returns the default filter directive.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the `verbose` default. Calling this twice
/// is harmless; the second call leaves the first subscriber in place.
pub fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let stderr_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(env_filter).with(stderr_layer);

    let log_file = std::env::var_os(LOG_FILE_ENV).filter(|p| !p.is_empty());
    let Some(path) = log_file else {
        let _ = registry.try_init();
        return;
    };

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            let file_layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            let _ = registry.with(file_layer).try_init();
        }
        Err(e) => {
            let _ = registry.try_init();
            tracing::warn!(path = %path.to_string_lossy(), error = %e, "Cannot open log file");
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer, logs and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            timer = self.name,
            duration = %humantime::format_duration(elapsed),
            "Timer stopped"
        );
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "debug");
    }
}
