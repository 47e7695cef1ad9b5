//! Core types for the call monitor
//!
//! Identifiers, call state, the `CallInfo` snapshot handed to notification
//! sinks, and the event payloads the transport engine delivers to a
//! [`CallSession`](crate::session::CallSession).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Call identifier assigned by the remote side (SIP Call-ID or equivalent)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the transport engine when the session is created
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct LocalSessionId(pub String);

impl LocalSessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocalSessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for LocalSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of the call relative to the local endpoint
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Local party dialled out
    Outbound,
    /// Remote party called in
    Inbound,
}

/// Lifecycle state of a call session
///
/// ```text
/// Initialized ──▶ Ringing ──▶ Answered ──▶ Ended
///      │             │
///      └─────────────┴──▶ Rejected | Canceled | Failed
/// ```
///
/// `Rejected`, `Ignored`, `Canceled`, `Failed` and `Ended` are terminal.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallState {
    Initialized,
    Ringing,
    Answered,
    Rejected,
    Ignored,
    Canceled,
    Failed,
    Ended,
}

impl CallState {
    /// Whether no further state change is valid from this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Rejected
                | CallState::Ignored
                | CallState::Canceled
                | CallState::Failed
                | CallState::Ended
        )
    }

    /// Whether `next` is listed in the transition table for this state
    ///
    /// The session does not enforce this table (only the terminal guard is
    /// enforced); it exists so callers and tests can check their sequences.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (s, _) if s.is_terminal() => false,
            (_, Failed) => true,
            (Initialized, Ringing | Answered | Rejected | Canceled | Ignored) => true,
            (Ringing, Answered | Canceled | Rejected | Ignored) => true,
            (Answered, Ended) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot of a session handed to notification sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Remote call id, if assigned yet
    pub id: Option<CallId>,
    /// Transport-assigned session id
    pub local_session_id: LocalSessionId,
    pub direction: CallDirection,
    /// Source (peer) address
    pub src: String,
    /// Destination (target) address
    pub dest: String,
    pub state: CallState,
    pub extra_headers: HashMap<String, String>,
}

/// Termination payload delivered with failed/ended events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEndEvent {
    /// Party that ended the call (e.g. "caller", "callee", "local", "remote", "system")
    pub originator: String,
    /// Engine-supplied cause (e.g. "NORMAL_CLEARANCE", "Rejected", "Canceled")
    pub cause: String,
    /// SIP status code, when the termination came from a response
    pub status_code: Option<u16>,
}

impl SessionEndEvent {
    pub fn new(originator: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            originator: originator.into(),
            cause: cause.into(),
            status_code: None,
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

/// Peer-connection negotiation step that failed
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum PeerConnectionStage {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
}

impl PeerConnectionStage {
    /// Name the stats engine uses for this step when an error is reported
    pub fn engine_function(&self) -> &'static str {
        match self {
            PeerConnectionStage::CreateOffer => "createOffer",
            PeerConnectionStage::CreateAnswer => "createAnswer",
            PeerConnectionStage::SetLocalDescription => "setLocalDescription",
            PeerConnectionStage::SetRemoteDescription => "setRemoteDescription",
            PeerConnectionStage::AddIceCandidate => "addIceCandidate",
        }
    }
}

impl fmt::Display for PeerConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine_function())
    }
}

/// ICE gathering state as reported by the transport engine
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// ICE connection state changes observed on the media connection
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// A single audio device as reported by the device layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub label: String,
}

/// Audio device inventory attached to the "answered" diagnostic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevicesInfo {
    pub inputs: Vec<AudioDevice>,
    pub outputs: Vec<AudioDevice>,
    pub selected_input: Option<String>,
    pub selected_output: Option<String>,
}
