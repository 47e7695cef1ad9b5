//! Call session lifecycle tracking for RVoIP endpoints.
//!
//! This crate observes one real-time call from initiation to termination and
//! keeps a consistent, timestamped record of what happened to it. The
//! transport engine that actually negotiates SIP/SDP stays outside; it feeds
//! events into a [`CallSession`], which:
//!
//! - drives the call state machine and refuses to leave a terminal state
//! - records signalling milestones in a [`SignallingTimeline`]
//! - bounds ICE candidate gathering with an [`IceGatheringMonitor`]
//! - routes every fault exactly once through the [`FailureRouter`]
//! - emits exactly one answered and one terminated notification
//!
//! Everything the session talks to (transport, RTP stats, audio devices,
//! stats engine, notification and diagnostics sinks) is a trait in
//! [`collaborators`], bundled into [`SessionCollaborators`].

// Error handling
pub mod error;

// Core types
pub mod types;

// Configuration and logging setup
pub mod config;
pub mod logging;

// Signalling milestones
pub mod timeline;

// Diagnostics and fault routing
pub mod diagnostics;
pub mod failure;

// ICE candidates and the gathering watchdog
pub mod ice;

// External collaborators
pub mod collaborators;

// Call session state machine
pub mod session;
pub mod registry;

// Public exports
pub use collaborators::{
    AudioDeviceLayer, CallEventHandler, FabricEvent, OneWayAudioDetector, RtpStatsCollector,
    RtpStatsFactory, SessionCollaborators, StatsEngine, TransportSession,
};
pub use config::{CallMonitorConfig, EncodingParameters, NetworkPriority};
pub use diagnostics::{
    DiagnosticCategory, DiagnosticEvent, DiagnosticsSink, Severity, TracingDiagnosticsSink,
};
pub use error::{CallMonitorError, CallMonitorResult};
pub use failure::{FailureRouter, Fault, FaultKind, FaultReporter};
pub use ice::{CandidateType, IceCandidate, IceCandidateEvent, IceGatheringMonitor};
pub use logging::{setup_logging, LoggingConfig};
pub use registry::SessionRegistry;
pub use session::CallSession;
pub use timeline::{
    MediaConnectionUpdate, SignallingInfo, SignallingReport, SignallingTimeline, SignallingUpdate,
};
pub use types::{
    AudioDevice, AudioDevicesInfo, CallDirection, CallId, CallInfo, CallState, IceGatheringState,
    LocalSessionId, MediaConnectionState, PeerConnectionStage, SessionEndEvent,
};

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        CallDirection, CallInfo, CallMonitorConfig, CallMonitorError, CallMonitorResult,
        CallSession, CallState, IceCandidate, IceCandidateEvent, LocalSessionId,
        SessionCollaborators, SessionEndEvent, SessionRegistry,
    };
}
