//! Structured logging facade.
//!
//! The core never calls `log::` macros directly; it calls through a
//! `&dyn Logger` so an embedder can substitute its own sink (a colorized,
//! file-rotating logger is out of scope for this crate).
//! [`DefaultLogger`] bridges onto the `log` facade for embedders that
//! don't need anything fancier.

use std::fmt;

/// Severity levels, carried over from the original logger's seven-level
/// taxonomy (`threaddebug` < `debug` < `data` < `info` < `warning` < `error`
/// < `critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    ThreadDebug,
    Debug,
    Data,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::ThreadDebug => "threaddebug",
            Severity::Debug => "debug",
            Severity::Data => "data",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Sink for the core's log messages. Implementations must be safe to call
/// concurrently: the receive loop, the send path, and the reporter may all
/// log from different threads at once.
pub trait Logger: Send + Sync {
    fn log(&self, severity: Severity, target: &str, message: &str);
}

/// Forwards every severity onto the `log` facade, folding the finer
/// `threaddebug`/`data` levels `log::Level` doesn't have into their nearest
/// neighbor and tagging the original severity into the target so a
/// subscriber can still tell them apart.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn log(&self, severity: Severity, target: &str, message: &str) {
        let level = match severity {
            Severity::ThreadDebug | Severity::Debug => log::Level::Debug,
            Severity::Data | Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Critical => log::Level::Error,
        };
        log::log!(target: target, level, "[{severity}] {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingLogger {
        lines: Mutex<Vec<(Severity, String)>>,
    }

    impl Logger for RecordingLogger {
        fn log(&self, severity: Severity, _target: &str, message: &str) {
            self.lines.lock().unwrap().push((severity, message.to_string()));
        }
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::ThreadDebug < Severity::Debug);
        assert!(Severity::Debug < Severity::Data);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn custom_logger_receives_calls() {
        let recorder = Arc::new(RecordingLogger::default());
        let logger: Arc<dyn Logger> = recorder.clone();
        logger.log(Severity::Warning, "msgsock", "message truncated \"abc\"");
        let lines = recorder.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, Severity::Warning);
    }

    #[test]
    fn default_logger_does_not_panic() {
        let logger = DefaultLogger;
        logger.log(Severity::Info, "msgsock", "connected \"h1[127.0.0.1:9000]\"");
        logger.log(Severity::Critical, "msgsock", "boom");
    }
}
