//! Diagnostic events emitted by call sessions
//!
//! Every warning or error a session observes is turned into a
//! [`DiagnosticEvent`] and handed to the [`DiagnosticsSink`]. Events are
//! tagged with a category, a severity and a stable machine-readable code so
//! that metrics pipelines can aggregate them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AudioDevicesInfo, LocalSessionId};

/// Stable diagnostic codes
pub mod codes {
    pub const ANSWERED: &str = "answered";
    pub const ICE_TIMEOUT: &str = "ice_timeout";
    pub const ICE_CONNECTION_FAILED: &str = "ice_connection_failed";
    pub const MEDIA_ACQUISITION_FAILURE: &str = "media_acquisition_failure";
    pub const SDP_NEGOTIATION_FAILURE: &str = "sdp_negotiation_failure";
    pub const SIGNALLING_FAILURE: &str = "signalling_failure";
}

/// Hint attached to ICE gathering timeouts
pub const ICE_TIMEOUT_HINT: &str = "possible NAT/firewall issue";

/// Broad area a diagnostic belongs to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    Network,
    Media,
    Signalling,
    Call,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A tagged diagnostic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub local_session_id: LocalSessionId,
    pub category: DiagnosticCategory,
    pub severity: Severity,
    pub code: String,
    /// Measured value, when the event carries one (e.g. timeout seconds)
    pub value: Option<f64>,
    pub retryable: bool,
    pub hint: Option<String>,
    pub context: BTreeMap<String, String>,
    /// Device inventory, attached to "answered" when the device query succeeded
    pub audio_devices: Option<AudioDevicesInfo>,
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticEvent {
    pub fn new(
        local_session_id: LocalSessionId,
        category: DiagnosticCategory,
        severity: Severity,
        code: impl Into<String>,
    ) -> Self {
        Self {
            local_session_id,
            category,
            severity,
            code: code.into(),
            value: None,
            retryable: false,
            hint: None,
            context: BTreeMap::new(),
            audio_devices: None,
            timestamp: Utc::now(),
        }
    }

    /// Network warning raised when ICE gathering did not finish in time
    pub fn ice_timeout(local_session_id: LocalSessionId, seconds: f64) -> Self {
        Self::new(
            local_session_id,
            DiagnosticCategory::Network,
            Severity::Warning,
            codes::ICE_TIMEOUT,
        )
        .with_value(seconds)
        .with_retryable(true)
        .with_hint(ICE_TIMEOUT_HINT)
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// JSON form used when shipping diagnostics off-host
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn with_audio_devices(mut self, devices: AudioDevicesInfo) -> Self {
        self.audio_devices = Some(devices);
        self
    }
}

/// Consumer of diagnostic events (metrics pipeline, log shipper, ...)
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Sink that forwards diagnostics to `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingDiagnosticsSink;

impl DiagnosticsSink for TracingDiagnosticsSink {
    fn emit(&self, event: DiagnosticEvent) {
        match event.severity {
            Severity::Info => tracing::info!(
                session = %event.local_session_id,
                category = ?event.category,
                code = %event.code,
                "diagnostic"
            ),
            Severity::Warning => tracing::warn!(
                session = %event.local_session_id,
                category = ?event.category,
                code = %event.code,
                hint = ?event.hint,
                "diagnostic"
            ),
            Severity::Error => tracing::error!(
                session = %event.local_session_id,
                category = ?event.category,
                code = %event.code,
                payload = %event.to_json(),
                "diagnostic"
            ),
        }
    }
}
