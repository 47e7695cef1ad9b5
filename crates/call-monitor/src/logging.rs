//! Logging for the call monitor
//!
//! Every session owns a `call_session` span carrying its local session id and
//! direction; background work a session spawns (device queries, the ICE
//! watchdog, one-way-audio checks) runs inside it, so events from those tasks
//! can be attributed to the call.
//!
//! [`setup_logging`] installs a subscriber for applications that do not bring
//! their own. Call monitor events get their own level, independent of the
//! level used for every other target.

use std::str::FromStr;

use tracing::{Level, Span};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CallMonitorError, CallMonitorResult};
use crate::types::{CallDirection, LocalSessionId};

/// Tracing target of this crate's events
pub const CALL_MONITOR_TARGET: &str = "rvoip_call_monitor";

/// Subscriber settings for [`setup_logging`]
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for call monitor events
    pub call_monitor_level: Level,
    /// Level for every other target (transport engine, application)
    pub default_level: Level,
    pub json: bool,
    /// Log each `call_session` span when it closes, with busy/idle time
    pub session_timing: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            call_monitor_level: Level::INFO,
            default_level: Level::WARN,
            json: false,
            session_timing: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(call_monitor_level: Level) -> Self {
        Self {
            call_monitor_level,
            ..Default::default()
        }
    }

    pub fn with_default_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_session_timing(mut self) -> Self {
        self.session_timing = true;
        self
    }

    /// Filter for this config; `RUST_LOG` directives are layered on top
    pub fn env_filter(&self) -> CallMonitorResult<EnvFilter> {
        let directive = format!("{}={}", CALL_MONITOR_TARGET, self.call_monitor_level)
            .to_ascii_lowercase()
            .parse::<Directive>()
            .map_err(|e| CallMonitorError::config(format!("Invalid log directive: {}", e)))?;

        Ok(EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.default_level).into())
            .from_env_lossy()
            .add_directive(directive))
    }
}

/// Install a global `tracing` subscriber for `config`
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> CallMonitorResult<()> {
    let span_events = if config.session_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter()?)
        .with_span_events(span_events);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| CallMonitorError::config(format!("Failed to install logger: {}", e)))?;

    tracing::debug!(
        "Call monitor logging at {} (other targets at {})",
        config.call_monitor_level,
        config.default_level
    );
    Ok(())
}

/// Span for one call session
pub fn session_span(local_session_id: &LocalSessionId, direction: CallDirection) -> Span {
    tracing::info_span!("call_session", session = %local_session_id, direction = ?direction)
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> CallMonitorResult<Level> {
    Level::from_str(level).map_err(|_| CallMonitorError::config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_call_monitor_level_is_scoped_to_crate_target() {
        let config = LoggingConfig::new(Level::DEBUG).with_default_level(Level::ERROR);
        let filter = config.env_filter().unwrap().to_string();
        assert!(filter.contains("rvoip_call_monitor=debug"), "filter was {}", filter);
    }

    #[test]
    fn test_setup_logging_twice_fails_second_time() {
        let _ = setup_logging(LoggingConfig::new(Level::WARN));
        let second = setup_logging(LoggingConfig::new(Level::WARN));
        assert!(matches!(second, Err(CallMonitorError::Configuration { .. })));
    }
}
