//! Fault classification and routing
//!
//! A [`Fault`] is one failure instance observed on a session. The
//! [`FailureRouter`] dispatches each fault to the single [`FaultReporter`]
//! method matching its [`FaultKind`]. There is no fan-out and no retry;
//! retrying belongs to the transport engine.
//!
//! Termination events are classified from their cause string:
//!
//! | Cause                                                          | Kind                    |
//! |----------------------------------------------------------------|-------------------------|
//! | `User Denied Media Access`, `RTP Timeout`                      | media acquisition       |
//! | `WebRTC Error`, `Incompatible SDP`, `Missing SDP`, `Bad Media Description` | SDP negotiation |
//! | anything else                                                  | signalling              |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::diagnostics::{codes, DiagnosticCategory};
use crate::types::{CallInfo, CallState, PeerConnectionStage, SessionEndEvent};

const MEDIA_CAUSES: &[&str] = &["user denied media access", "rtp timeout"];

const SDP_CAUSES: &[&str] = &[
    "webrtc error",
    "incompatible sdp",
    "missing sdp",
    "bad media description",
];

const REJECTED_CAUSES: &[&str] = &["rejected", "busy", "unavailable", "not found"];

const CANCELED_CAUSES: &[&str] = &["canceled", "cancelled"];

/// Kind of fault, selecting the reporter it is routed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    IceTimeout,
    MediaAcquisitionFailure,
    SdpNegotiationFailure,
    SignallingFailure,
}

impl FaultKind {
    /// Diagnostic code used for this kind
    pub fn code(&self) -> &'static str {
        match self {
            FaultKind::IceTimeout => codes::ICE_TIMEOUT,
            FaultKind::MediaAcquisitionFailure => codes::MEDIA_ACQUISITION_FAILURE,
            FaultKind::SdpNegotiationFailure => codes::SDP_NEGOTIATION_FAILURE,
            FaultKind::SignallingFailure => codes::SIGNALLING_FAILURE,
        }
    }

    pub fn category(&self) -> DiagnosticCategory {
        match self {
            FaultKind::IceTimeout => DiagnosticCategory::Network,
            FaultKind::MediaAcquisitionFailure | FaultKind::SdpNegotiationFailure => {
                DiagnosticCategory::Media
            }
            FaultKind::SignallingFailure => DiagnosticCategory::Signalling,
        }
    }

    /// Classify a termination cause
    pub fn classify_cause(cause: &str) -> Self {
        let cause = cause.trim().to_ascii_lowercase();
        if MEDIA_CAUSES.contains(&cause.as_str()) {
            FaultKind::MediaAcquisitionFailure
        } else if SDP_CAUSES.contains(&cause.as_str()) {
            FaultKind::SdpNegotiationFailure
        } else {
            FaultKind::SignallingFailure
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal state a failed session settles in, chosen from the cause
pub fn terminal_state_for_cause(cause: &str) -> CallState {
    let cause = cause.trim().to_ascii_lowercase();
    if REJECTED_CAUSES.contains(&cause.as_str()) {
        CallState::Rejected
    } else if CANCELED_CAUSES.contains(&cause.as_str()) {
        CallState::Canceled
    } else {
        CallState::Failed
    }
}

/// One observed failure instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub id: Uuid,
    pub kind: FaultKind,
    pub message: String,
    /// Negotiation step, for SDP faults raised by a peer-connection call
    pub stage: Option<PeerConnectionStage>,
    pub originator: Option<String>,
    pub status_code: Option<u16>,
    pub occurred_at: DateTime<Utc>,
}

impl Fault {
    fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            stage: None,
            originator: None,
            status_code: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn ice_timeout(seconds: f64) -> Self {
        Self::new(
            FaultKind::IceTimeout,
            format!("ICE gathering did not complete within {:.1}s", seconds),
        )
    }

    pub fn media_failure(error: impl Into<String>) -> Self {
        Self::new(FaultKind::MediaAcquisitionFailure, error)
    }

    pub fn sdp_failure(stage: PeerConnectionStage, error: impl Into<String>) -> Self {
        let mut fault = Self::new(FaultKind::SdpNegotiationFailure, error);
        fault.stage = Some(stage);
        fault
    }

    /// Fault for a session that failed before establishment
    pub fn from_termination(event: &SessionEndEvent) -> Self {
        let mut fault = Self::new(FaultKind::classify_cause(&event.cause), event.cause.clone());
        fault.originator = Some(event.originator.clone());
        fault.status_code = event.status_code;
        fault
    }
}

/// Reporting collaborators, one per fault kind
#[async_trait]
pub trait FaultReporter: Send + Sync {
    async fn report_ice_timeout(&self, call: &CallInfo, fault: &Fault);

    async fn report_media_failure(&self, call: &CallInfo, fault: &Fault);

    async fn report_sdp_failure(&self, call: &CallInfo, fault: &Fault);

    async fn report_signalling_failure(&self, call: &CallInfo, fault: &Fault);
}

/// Stateless dispatcher from fault kind to reporter
#[derive(Clone)]
pub struct FailureRouter {
    reporter: Arc<dyn FaultReporter>,
}

impl FailureRouter {
    pub fn new(reporter: Arc<dyn FaultReporter>) -> Self {
        Self { reporter }
    }

    /// Hand `fault` to the one reporter matching its kind
    pub async fn route(&self, call: &CallInfo, fault: &Fault) {
        debug!(
            "Routing {} fault {} for session {}",
            fault.kind, fault.id, call.local_session_id
        );
        match fault.kind {
            FaultKind::IceTimeout => self.reporter.report_ice_timeout(call, fault).await,
            FaultKind::MediaAcquisitionFailure => {
                self.reporter.report_media_failure(call, fault).await
            }
            FaultKind::SdpNegotiationFailure => self.reporter.report_sdp_failure(call, fault).await,
            FaultKind::SignallingFailure => {
                self.reporter.report_signalling_failure(call, fault).await
            }
        }
    }
}

impl fmt::Debug for FailureRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureRouter").finish_non_exhaustive()
    }
}
