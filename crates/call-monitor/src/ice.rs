//! ICE candidate handling and the gathering watchdog
//!
//! Gathering can stall for a long time when some interfaces never produce a
//! candidate (typically behind restrictive NATs or firewalls). The
//! [`IceGatheringMonitor`] bounds that wait: it is armed by the first host
//! candidate and, if gathering is still unresolved when the timeout elapses,
//! runs its expiry action exactly once.
//!
//! Resolution is a single atomic flag shared by every path that can end the
//! wait (relay/reflexive fast path, end-of-candidates, expiry, teardown).
//! Whichever path flips it first wins; every other path becomes a no-op.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{CallMonitorError, CallMonitorResult};
use crate::types::LocalSessionId;

/// ICE candidate type (RFC 8445 §5.1.1)
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl CandidateType {
    /// Relay and reflexive candidates mean a usable path already exists
    pub fn is_relay_or_reflexive(&self) -> bool {
        matches!(self, CandidateType::Srflx | CandidateType::Prflx | CandidateType::Relay)
    }
}

impl FromStr for CandidateType {
    type Err = CallMonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::Srflx),
            "prflx" => Ok(CandidateType::Prflx),
            "relay" => Ok(CandidateType::Relay),
            other => Err(CallMonitorError::invalid_candidate(format!(
                "unknown candidate type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        };
        f.write_str(name)
    }
}

/// A gathered ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub protocol: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub candidate_type: CandidateType,
}

impl IceCandidate {
    /// Parse an SDP candidate attribute
    ///
    /// Accepts `candidate:...` with or without the `a=` prefix:
    /// `candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 10.0.0.2 rport 46154`
    pub fn parse(line: &str) -> CallMonitorResult<Self> {
        let line = line.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let body = line
            .strip_prefix("candidate:")
            .ok_or_else(|| CallMonitorError::invalid_candidate("missing 'candidate:' prefix"))?;

        let parts: Vec<&str> = body.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(CallMonitorError::invalid_candidate(format!(
                "expected at least 8 fields, got {}",
                parts.len()
            )));
        }
        if parts[6] != "typ" {
            return Err(CallMonitorError::invalid_candidate(format!(
                "expected 'typ' at field 7, got '{}'",
                parts[6]
            )));
        }

        Ok(Self {
            foundation: parts[0].to_string(),
            component: parse_field(parts[1], "component")?,
            protocol: parts[2].to_ascii_lowercase(),
            priority: parse_field(parts[3], "priority")?,
            address: parts[4].to_string(),
            port: parse_field(parts[5], "port")?,
            candidate_type: parts[7].parse()?,
        })
    }
}

fn parse_field<T: FromStr>(field: &str, name: &str) -> CallMonitorResult<T> {
    field
        .parse::<T>()
        .map_err(|_| CallMonitorError::invalid_candidate(format!("invalid {} '{}'", name, field)))
}

/// Candidate notification from the transport engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceCandidateEvent {
    Candidate(IceCandidate),
    /// Gathering finished on its own
    EndOfCandidates,
}

/// Single-shot ICE gathering watchdog bound to one session
pub struct IceGatheringMonitor {
    session: LocalSessionId,
    armed: AtomicBool,
    resolved: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IceGatheringMonitor {
    pub fn new(session: LocalSessionId) -> Self {
        Self {
            session,
            armed: AtomicBool::new(false),
            resolved: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Whether a watchdog timer has ever been scheduled
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Whether gathering has been resolved by any path
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    /// Schedule `on_expire` to run once after `timeout` on `runtime`
    ///
    /// Returns `false` without scheduling anything when the monitor was
    /// already armed or gathering is already resolved.
    pub fn arm<F, Fut>(&self, runtime: &Handle, timeout: Duration, on_expire: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_resolved() {
            trace!("ICE watchdog for session {} not armed: already resolved", self.session);
            return false;
        }
        if self.armed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let resolved = self.resolved.clone();
        let session = self.session.clone();
        debug!(
            "Arming ICE gathering watchdog for session {} ({} ms)",
            session,
            timeout.as_millis()
        );

        let handle = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if resolved.swap(true, Ordering::SeqCst) {
                debug!("ICE watchdog for session {} expired after resolution", session);
                return;
            }
            debug!("ICE watchdog for session {} expired", session);
            on_expire().await;
        });
        *self.task.lock() = Some(handle);
        true
    }

    /// Mark gathering resolved
    ///
    /// Returns `true` only for the call that performed the resolution. A
    /// pending timer is cancelled; a timer that already fired keeps running
    /// its expiry action to completion.
    pub fn resolve(&self) -> bool {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        true
    }

    /// Cancel the watchdog on teardown
    pub fn disarm(&self) {
        if self.resolve() {
            debug!("ICE watchdog for session {} disarmed", self.session);
        }
    }
}

impl Drop for IceGatheringMonitor {
    fn drop(&mut self) {
        if !self.resolved.load(Ordering::SeqCst) {
            if let Some(handle) = self.task.get_mut().take() {
                handle.abort();
            }
        }
    }
}

impl fmt::Debug for IceGatheringMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceGatheringMonitor")
            .field("session", &self.session)
            .field("armed", &self.is_armed())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
