//! Call session state machine
//!
//! A [`CallSession`] tracks one call attempt from initiation to termination.
//! The transport engine drives it by calling the `on_*` handlers as events
//! arrive; the session keeps the state, the [`SignallingTimeline`] and the
//! stats handle consistent, and emits notifications and diagnostics outward.
//!
//! # Ordering and exactly-once guarantees
//!
//! Handlers may arrive in any order and some race each other (the ICE
//! watchdog against real candidates, `on_failed` against `on_ended`). The
//! session keeps the following guarantees regardless of ordering:
//!
//! - no handler moves the session out of a terminal state
//! - at most one watchdog timer is ever scheduled, and at most one "gathering
//!   ready" signal is sent
//! - the ICE timeout is reported once
//! - exactly one `on_call_answered` and one `on_call_terminated` notification
//! - the stats collector is released once; later releases are no-ops
//!
//! All fields live behind one lock per session. The lock is never held
//! across an `.await`; collaborator calls happen after the guard is gone.
//!
//! # Example
//!
//! ```rust,no_run
//! use rvoip_call_monitor::{CallDirection, CallMonitorConfig, CallSession, LocalSessionId,
//!     SessionCollaborators, SessionEndEvent};
//!
//! # async fn example(collaborators: SessionCollaborators) {
//! let session = CallSession::new(
//!     LocalSessionId::new(),
//!     CallDirection::Outbound,
//!     "sip:alice@example.com",
//!     "sip:bob@example.com",
//!     CallMonitorConfig::default(),
//!     collaborators,
//! );
//!
//! session.on_initiated();
//! session.on_progress(180);
//! session.on_accepted();
//! session.on_confirmed().await;
//! session
//!     .on_ended(&SessionEndEvent::new("callee", "NORMAL_CLEARANCE"), None)
//!     .await;
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument, Span};

use crate::collaborators::{FabricEvent, RtpStatsCollector, SessionCollaborators, StatsEngine};
use crate::config::CallMonitorConfig;
use crate::diagnostics::{codes, DiagnosticCategory, DiagnosticEvent, Severity};
use crate::error::{CallMonitorError, CallMonitorResult};
use crate::failure::{terminal_state_for_cause, FailureRouter, Fault, FaultKind};
use crate::ice::{IceCandidateEvent, IceGatheringMonitor};
use crate::logging;
use crate::timeline::{MediaConnectionUpdate, SignallingReport, SignallingTimeline, SignallingUpdate};
use crate::types::{
    CallDirection, CallId, CallInfo, CallState, IceGatheringState, LocalSessionId,
    MediaConnectionState, PeerConnectionStage, SessionEndEvent,
};

/// Engine function name used when reporting local media acquisition errors
const GET_USER_MEDIA_FUNCTION: &str = "getUserMedia";

/// Handle to one tracked call session
///
/// Cloning is cheap; all clones observe the same session.
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    local_session_id: LocalSessionId,
    direction: CallDirection,
    peer_address: String,
    target_address: String,
    config: CallMonitorConfig,
    collaborators: SessionCollaborators,
    failure_router: FailureRouter,
    ice_monitor: IceGatheringMonitor,
    /// Runtime the session was created on; background work is spawned here
    runtime: Option<Handle>,
    span: Span,
    state: Mutex<SessionState>,
}

struct SessionState {
    id: Option<CallId>,
    call_state: CallState,
    timeline: SignallingTimeline,
    stats: Option<Arc<dyn RtpStatsCollector>>,
    call_started_at: Option<Instant>,
    volume_streaming: bool,
    confirmed: bool,
    answered_notified: bool,
    termination_notified: bool,
    ice_timeout_reported: bool,
    fabric_terminated_reported: bool,
    one_way_audio_task: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            id: None,
            call_state: CallState::Initialized,
            timeline: SignallingTimeline::new(),
            stats: None,
            call_started_at: None,
            volume_streaming: false,
            confirmed: false,
            answered_notified: false,
            termination_notified: false,
            ice_timeout_reported: false,
            fabric_terminated_reported: false,
            one_way_audio_task: None,
            destroyed: false,
        }
    }
}

impl CallSession {
    /// Create a session for a call attempt the transport engine accepted
    pub fn new(
        local_session_id: LocalSessionId,
        direction: CallDirection,
        peer_address: impl Into<String>,
        target_address: impl Into<String>,
        config: CallMonitorConfig,
        collaborators: SessionCollaborators,
    ) -> Self {
        let failure_router = FailureRouter::new(collaborators.faults.clone());
        let ice_monitor = IceGatheringMonitor::new(local_session_id.clone());
        let span = logging::session_span(&local_session_id, direction);
        info!(
            "Created {:?} call session {}",
            direction, local_session_id
        );
        Self {
            inner: Arc::new(SessionInner {
                local_session_id,
                direction,
                peer_address: peer_address.into(),
                target_address: target_address.into(),
                config,
                collaborators,
                failure_router,
                ice_monitor,
                runtime: Handle::try_current().ok(),
                span,
                state: Mutex::new(SessionState::new()),
            }),
        }
    }

    // ===== ACCESSORS =====

    pub fn local_session_id(&self) -> &LocalSessionId {
        &self.inner.local_session_id
    }

    pub fn direction(&self) -> CallDirection {
        self.inner.direction
    }

    pub fn peer_address(&self) -> &str {
        &self.inner.peer_address
    }

    pub fn target_address(&self) -> &str {
        &self.inner.target_address
    }

    pub fn id(&self) -> Option<CallId> {
        self.inner.state.lock().id.clone()
    }

    pub fn state(&self) -> CallState {
        self.inner.state.lock().call_state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Copy of the timeline stages in insertion order
    pub fn timeline(&self) -> Vec<String> {
        self.inner.state.lock().timeline.stages().to_vec()
    }

    pub fn media_connection_info(&self) -> BTreeMap<MediaConnectionState, DateTime<Utc>> {
        self.inner.state.lock().timeline.media_connection().clone()
    }

    pub fn ice_watchdog_armed(&self) -> bool {
        self.inner.ice_monitor.is_armed()
    }

    /// Whether a stats collector is currently held
    pub fn has_call_stats(&self) -> bool {
        self.inner.state.lock().stats.is_some()
    }

    pub fn config(&self) -> &CallMonitorConfig {
        &self.inner.config
    }

    /// Whether `other` is a handle to this same session
    pub fn same_session(&self, other: &CallSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot handed to notification sinks
    pub fn call_info(&self) -> CallInfo {
        let st = self.inner.state.lock();
        self.snapshot(&st)
    }

    fn snapshot(&self, st: &SessionState) -> CallInfo {
        CallInfo {
            id: st.id.clone(),
            local_session_id: self.inner.local_session_id.clone(),
            direction: self.inner.direction,
            src: self.inner.peer_address.clone(),
            dest: self.inner.target_address.clone(),
            state: st.call_state,
            extra_headers: self.inner.config.extra_headers.clone(),
        }
    }

    /// Connection id reported to the stats engine
    fn stats_connection_id(&self) -> String {
        self.inner
            .collaborators
            .transport
            .media_connection_id()
            .unwrap_or_else(|| self.inner.local_session_id.to_string())
    }

    /// Runtime for background work: the creating runtime, else the caller's
    fn runtime(&self) -> Option<Handle> {
        self.inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    fn stats_engine(&self) -> Option<Arc<dyn StatsEngine>> {
        if !self.inner.config.stats_engine_enabled {
            return None;
        }
        self.inner.collaborators.stats_engine.clone()
    }

    // ===== TRANSITION API =====

    /// Overwrite the call state
    ///
    /// Callers are trusted to follow the transition table; the only rule
    /// enforced here is that a terminal state is never left.
    pub fn set_state(&self, next: CallState) -> CallMonitorResult<()> {
        let mut st = self.inner.state.lock();
        self.apply_state(&mut st, next)
    }

    fn apply_state(&self, st: &mut SessionState, next: CallState) -> CallMonitorResult<()> {
        let current = st.call_state;
        if current == next {
            return Ok(());
        }
        if current.is_terminal() {
            warn!(
                "Session {} refused transition {:?} -> {:?}: state is terminal",
                self.inner.local_session_id, current, next
            );
            return Err(CallMonitorError::InvalidTransition {
                session: self.inner.local_session_id.to_string(),
                from: current,
                to: next,
            });
        }
        if !current.can_transition_to(next) {
            debug!(
                "Session {} taking unlisted transition {:?} -> {:?}",
                self.inner.local_session_id, current, next
            );
        }
        st.call_state = next;
        debug!(
            "Session {} state: {:?} -> {:?}",
            self.inner.local_session_id, current, next
        );
        Ok(())
    }

    /// Move to `next` unless the session is already terminal
    fn advance(&self, st: &mut SessionState, next: CallState) {
        if !st.call_state.is_terminal() {
            let _ = self.apply_state(st, next);
        }
    }

    /// Assign the remote call id; re-assigning the same value is accepted
    pub fn set_id(&self, id: CallId) -> CallMonitorResult<()> {
        let mut st = self.inner.state.lock();
        match &st.id {
            Some(current) if *current == id => Ok(()),
            Some(current) => Err(CallMonitorError::CallIdAlreadyAssigned {
                current: current.clone(),
                attempted: id,
            }),
            None => {
                debug!("Session {} assigned call id {}", self.inner.local_session_id, id);
                st.id = Some(id);
                Ok(())
            }
        }
    }

    /// Record the first ringing indication; later calls are ignored
    ///
    /// Returns `true` when this call stored the value.
    pub fn set_post_dial_delay_end_time(&self, at: DateTime<Utc>) -> bool {
        self.inner.state.lock().timeline.set_post_dial_delay_end_time(at)
    }

    /// Append a raw stage label to the timeline
    pub fn add_stage(&self, label: impl Into<String>) {
        self.inner.state.lock().timeline.append(label);
    }

    pub fn update_signalling(&self, update: SignallingUpdate) {
        self.inner.state.lock().timeline.merge(update);
    }

    pub fn update_media_connection_info(&self, update: MediaConnectionUpdate) {
        self.inner.state.lock().timeline.merge_media(update);
    }

    /// Signalling record with the post-dial delay derived at read time
    pub fn get_signalling_info(&self) -> SignallingReport {
        self.inner.state.lock().timeline.report(Utc::now())
    }

    // ===== SIGNALLING HANDLERS =====

    /// The call attempt left the local endpoint (outbound) or arrived (inbound)
    pub fn on_initiated(&self) {
        let now = Utc::now();
        let mut st = self.inner.state.lock();
        st.timeline.append_at("initiated", now);
        st.timeline.merge(SignallingUpdate {
            call_initiation_time: Some(now),
            ..Default::default()
        });
    }

    /// Provisional response received (180 Ringing, 183 Session Progress, ...)
    pub fn on_progress(&self, status_code: u16) {
        let now = Utc::now();
        let mut st = self.inner.state.lock();
        let update = match status_code {
            180 => SignallingUpdate {
                ring_time: Some(now),
                ..Default::default()
            },
            183 => SignallingUpdate {
                progress_time: Some(now),
                ..Default::default()
            },
            101..=199 => {
                debug!(
                    "Session {} ignoring provisional response {}",
                    self.inner.local_session_id, status_code
                );
                return;
            }
            _ => {
                warn!(
                    "Session {} got non-provisional status {} as progress",
                    self.inner.local_session_id, status_code
                );
                return;
            }
        };

        let label = if status_code == 180 { "ringing" } else { "progress" };
        st.timeline.append_at(label, now);
        st.timeline.merge(update);
        st.timeline.set_post_dial_delay_end_time(now);
        if st.call_state == CallState::Initialized {
            let _ = self.apply_state(&mut st, CallState::Ringing);
        }
    }

    /// The far end accepted the call (2xx)
    ///
    /// The device query runs in the background so the "answered" diagnostic
    /// never waits on, or is skipped by, that query. Without any Tokio
    /// runtime the diagnostic is emitted right away, without device info.
    pub fn on_accepted(&self) {
        let session_id = self.inner.local_session_id.clone();
        let now = Utc::now();
        {
            let mut st = self.inner.state.lock();
            if st.call_state.is_terminal() {
                warn!("Session {} accepted after reaching {:?}; ignoring", session_id, st.call_state);
                return;
            }
            st.timeline.merge(SignallingUpdate {
                answer_time: Some(now),
                ..Default::default()
            });
            if st.call_started_at.is_none() {
                st.call_started_at = Some(Instant::now());
            }
            // Started under the lock so release_resources always sees the flag
            if !std::mem::replace(&mut st.volume_streaming, true) {
                self.inner.collaborators.devices.start_volume_streaming(&session_id);
            }
        }

        self.emit_answered_diagnostic();
        info!("Session {} accepted", session_id);
    }

    fn emit_answered_diagnostic(&self) {
        let session_id = self.inner.local_session_id.clone();
        let event = DiagnosticEvent::new(
            session_id.clone(),
            DiagnosticCategory::Call,
            Severity::Info,
            codes::ANSWERED,
        );
        let diagnostics = self.inner.collaborators.diagnostics.clone();

        let Some(runtime) = self.runtime() else {
            warn!("Session {} has no runtime for the device query", session_id);
            diagnostics.emit(event.with_context("device_query_error", "no runtime available"));
            return;
        };

        let devices = self.inner.collaborators.devices.clone();
        runtime.spawn(
            async move {
                let event = match devices.get_audio_devices_info().await {
                    Ok(devices_info) => event.with_audio_devices(devices_info),
                    Err(e) => {
                        debug!("Session {} device query failed: {}", session_id, e);
                        event.with_context("device_query_error", e.to_string())
                    }
                };
                diagnostics.emit(event);
            }
            .instrument(self.inner.span.clone()),
        );
    }

    /// Session confirmed (ACK): the call is established
    pub async fn on_confirmed(&self) {
        let session_id = self.inner.local_session_id.clone();
        let now = Utc::now();

        let info = {
            let mut st = self.inner.state.lock();
            if st.call_state.is_terminal() {
                warn!("Session {} confirmed after reaching {:?}; ignoring", session_id, st.call_state);
                return;
            }
            if st.confirmed {
                debug!("Session {} already confirmed", session_id);
                return;
            }
            st.confirmed = true;
            st.timeline.append_at("confirmed", now);
            let _ = self.apply_state(&mut st, CallState::Answered);
            st.timeline.merge(SignallingUpdate {
                call_confirmed_time: Some(now),
                ..Default::default()
            });
            self.snapshot(&st)
        };

        let transport = &self.inner.collaborators.transport;
        if let Some(params) = &self.inner.config.encoding_parameters {
            if !params.is_empty() {
                transport.apply_encoding_parameters(params);
            }
        }
        if self.inner.config.disable_rtp_timeout {
            transport.set_rtp_timeout_enabled(false);
        }

        let needs_stats = {
            let st = self.inner.state.lock();
            st.stats.is_none() && !st.call_state.is_terminal()
        };
        if needs_stats {
            let collector = self.inner.collaborators.rtp_stats.create(&info);
            collector.start();
            self.install_call_stats(collector);
        }

        self.inner.collaborators.devices.stop_ringtone();

        let notify = {
            let mut st = self.inner.state.lock();
            !st.termination_notified && !std::mem::replace(&mut st.answered_notified, true)
        };
        if !notify {
            debug!("Session {} terminated during confirmation", session_id);
            return;
        }
        self.inner.collaborators.events.on_call_answered(info).await;

        self.schedule_one_way_audio_check();
        info!("Session {} confirmed", session_id);
    }

    /// Keep a started collector, or stop it if the session ended meanwhile
    fn install_call_stats(&self, collector: Arc<dyn RtpStatsCollector>) {
        let rejected = {
            let mut st = self.inner.state.lock();
            if st.call_state.is_terminal() || st.stats.is_some() {
                Some(collector)
            } else {
                st.stats = Some(collector);
                None
            }
        };
        if let Some(collector) = rejected {
            debug!(
                "Session {} dropping call stats started after teardown",
                self.inner.local_session_id
            );
            collector.clear_timers();
            collector.stop();
        }
    }

    fn schedule_one_way_audio_check(&self) {
        let Some(detector) = self.inner.collaborators.one_way_audio.clone() else {
            return;
        };
        let Some(runtime) = self.runtime() else {
            debug!(
                "Session {} has no runtime for one-way audio detection",
                self.inner.local_session_id
            );
            return;
        };
        let Some(connection_id) = self.inner.collaborators.transport.media_connection_id() else {
            debug!(
                "Session {} has no media connection for one-way audio detection",
                self.inner.local_session_id
            );
            return;
        };

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.config.one_way_audio_check_delay();
        let span = self.inner.span.clone();
        let handle = runtime.spawn(
            async move {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let session = CallSession { inner };
                let info = session.call_info();
                if info.state != CallState::Answered {
                    debug!(
                        "Session {} left Answered before one-way audio check",
                        info.local_session_id
                    );
                    return;
                }
                detector.start(&info, &connection_id);
            }
            .instrument(span),
        );

        let stale = {
            let mut st = self.inner.state.lock();
            if st.call_state.is_terminal() {
                Some(handle)
            } else {
                st.one_way_audio_task.replace(handle)
            }
        };
        if let Some(stale) = stale {
            stale.abort();
        }
    }

    // ===== ICE HANDLERS =====

    /// A candidate was gathered, or gathering finished
    ///
    /// The watchdog timer runs on the session's runtime. A session created
    /// outside any runtime, and called from outside one, cannot arm it; the
    /// candidate is then only logged.
    pub fn on_ice_candidate(&self, event: IceCandidateEvent) {
        let candidate = match event {
            IceCandidateEvent::EndOfCandidates => {
                if self.inner.ice_monitor.resolve() {
                    debug!("Session {} ICE gathering complete", self.inner.local_session_id);
                }
                return;
            }
            IceCandidateEvent::Candidate(candidate) => candidate,
        };

        if candidate.candidate_type.is_relay_or_reflexive() {
            debug!(
                "Session {} got {} candidate; gathering may conclude",
                self.inner.local_session_id, candidate.candidate_type
            );
            self.signal_gathering_ready();
            return;
        }

        if self.is_terminal() {
            return;
        }

        let Some(runtime) = self.runtime() else {
            warn!(
                "Session {} has no runtime; ICE gathering watchdog not armed",
                self.inner.local_session_id
            );
            return;
        };

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.config.ice_gathering_timeout();
        let span = self.inner.span.clone();
        self.inner.ice_monitor.arm(&runtime, timeout, move || {
            async move {
                if let Some(inner) = weak.upgrade() {
                    CallSession { inner }.on_ice_watchdog_expired(timeout).await;
                }
            }
            .instrument(span)
        });
    }

    fn signal_gathering_ready(&self) {
        if self.inner.ice_monitor.resolve() {
            self.inner.collaborators.transport.mark_gathering_ready();
        }
    }

    async fn on_ice_watchdog_expired(&self, timeout: Duration) {
        let session_id = &self.inner.local_session_id;
        let destroyed = self.inner.state.lock().destroyed;
        if destroyed {
            debug!("Session {} destroyed before ICE watchdog fired", session_id);
            return;
        }
        if self.inner.collaborators.transport.ice_gathering_state() == IceGatheringState::Complete {
            debug!("Session {} ICE gathering completed before watchdog", session_id);
            return;
        }
        self.inner.collaborators.transport.mark_gathering_ready();
        self.on_ice_timeout(timeout.as_secs_f64()).await;
    }

    /// ICE gathering was deemed timed out after `seconds`
    pub async fn on_ice_timeout(&self, seconds: f64) {
        let session_id = self.inner.local_session_id.clone();
        let fault = Fault::ice_timeout(seconds);
        let info = {
            let mut st = self.inner.state.lock();
            if std::mem::replace(&mut st.ice_timeout_reported, true) {
                debug!("Session {} ICE timeout already reported", session_id);
                return;
            }
            st.timeline.append_at(fault.kind.code(), fault.occurred_at);
            self.snapshot(&st)
        };

        warn!(
            "Session {} ICE gathering timed out after {:.1}s (possible NAT/firewall issue)",
            session_id, seconds
        );
        self.inner
            .collaborators
            .diagnostics
            .emit(DiagnosticEvent::ice_timeout(session_id, seconds));
        self.inner.failure_router.route(&info, &fault).await;
    }

    /// ICE connection state changed on the media connection
    pub fn on_media_connection_state(&self, state: MediaConnectionState) {
        let now = Utc::now();
        self.update_media_connection_info(MediaConnectionUpdate::new().with(state, now));
        debug!("Session {} media connection {:?}", self.inner.local_session_id, state);

        if state == MediaConnectionState::Failed {
            self.inner.collaborators.diagnostics.emit(
                DiagnosticEvent::new(
                    self.inner.local_session_id.clone(),
                    DiagnosticCategory::Network,
                    Severity::Warning,
                    codes::ICE_CONNECTION_FAILED,
                )
                .with_retryable(true),
            );
        }
    }

    // ===== TERMINATION HANDLERS =====

    /// The session was rejected or failed before full establishment
    pub async fn on_failed(&self, event: &SessionEndEvent) {
        let session_id = self.inner.local_session_id.clone();
        let now = Utc::now();
        let fault = Fault::from_termination(event);

        let (info, first) = {
            let mut st = self.inner.state.lock();
            st.timeline.append_at("failed", now);
            let mut update = SignallingUpdate::hangup(now, event.originator.clone(), event.cause.clone());
            update.last_signalling_error = Some(event.cause.clone());
            st.timeline.merge(update);

            let first = !std::mem::replace(&mut st.termination_notified, true);
            if first {
                self.advance(&mut st, terminal_state_for_cause(&event.cause));
            }
            (self.snapshot(&st), first)
        };

        if !first {
            debug!("Session {} failure after termination; record only", session_id);
            return;
        }

        warn!(
            "Session {} failed: {} (originator {}, status {:?})",
            session_id, event.cause, event.originator, event.status_code
        );
        self.emit_fault_diagnostic(&fault);
        self.inner.failure_router.route(&info, &fault).await;
        self.release_resources();
        self.inner.collaborators.events.on_call_terminated(info).await;
    }

    /// Normal or abnormal termination after establishment
    ///
    /// `current` is the session the caller considers active at the time of
    /// the event. When it is a different session, that session is notified
    /// and cleaned up as well.
    pub async fn on_ended(&self, event: &SessionEndEvent, current: Option<&CallSession>) {
        let session_id = self.inner.local_session_id.clone();
        let now = Utc::now();

        let (info, notify, report_fabric) = {
            let mut st = self.inner.state.lock();
            st.timeline.append_at("ended", now);
            self.advance(&mut st, CallState::Ended);

            let mut update = SignallingUpdate::hangup(now, event.originator.clone(), event.cause.clone());
            if let Some(started) = st.call_started_at {
                update.call_duration_ms = Some(started.elapsed().as_millis() as i64);
            }
            st.timeline.merge(update);

            let notify = !std::mem::replace(&mut st.termination_notified, true);
            let report_fabric = !std::mem::replace(&mut st.fabric_terminated_reported, true);
            (self.snapshot(&st), notify, report_fabric)
        };

        info!(
            "Session {} ended by {} ({})",
            session_id, event.originator, event.cause
        );

        if report_fabric {
            if let Some(engine) = self.stats_engine() {
                let connection_id = self.stats_connection_id();
                engine
                    .send_fabric_event(&connection_id, FabricEvent::FabricTerminated)
                    .await;
            }
        }

        self.release_resources();
        if notify {
            self.inner.collaborators.events.on_call_terminated(info).await;
        }

        if let Some(other) = current {
            if !self.same_session(other) {
                debug!(
                    "Session {} ended while {} was current; terminating it too",
                    session_id,
                    other.local_session_id()
                );
                other.finish_termination().await;
            }
        }
    }

    /// Notify termination (once) and release resources
    async fn finish_termination(&self) {
        let (info, notify) = {
            let mut st = self.inner.state.lock();
            let notify = !std::mem::replace(&mut st.termination_notified, true);
            (self.snapshot(&st), notify)
        };
        self.release_resources();
        if notify {
            self.inner.collaborators.events.on_call_terminated(info).await;
        }
    }

    // ===== MEDIA / NEGOTIATION FAILURES =====

    /// Local media acquisition failed (microphone or camera unavailable)
    pub async fn on_get_user_media_failed(&self, error: &str) {
        let session_id = self.inner.local_session_id.clone();
        let fault = Fault::media_failure(error);
        let info = {
            let mut st = self.inner.state.lock();
            st.timeline.append_at(fault.kind.code(), fault.occurred_at);
            self.snapshot(&st)
        };

        if let Some(engine) = self.stats_engine() {
            if engine.identity().is_some() {
                let connection_id = self.stats_connection_id();
                engine
                    .report_error(&connection_id, GET_USER_MEDIA_FUNCTION, error)
                    .await;
            }
        }

        warn!("Session {} media acquisition failed: {}", session_id, error);
        self.emit_fault_diagnostic(&fault);
        self.inner.failure_router.route(&info, &fault).await;
    }

    /// Offer/answer or description-setting failed at `stage`
    pub async fn handle_peer_connection_failure(&self, stage: PeerConnectionStage, error: &str) {
        let session_id = self.inner.local_session_id.clone();
        let fault = Fault::sdp_failure(stage, error);
        let info = {
            let mut st = self.inner.state.lock();
            st.timeline.append_at(fault.kind.code(), fault.occurred_at);
            st.timeline.merge(SignallingUpdate {
                last_signalling_error: Some(format!("{}: {}", stage, error)),
                ..Default::default()
            });
            self.snapshot(&st)
        };

        if let Some(engine) = self.stats_engine() {
            let connection_id = self.stats_connection_id();
            engine
                .report_error(&connection_id, stage.engine_function(), error)
                .await;
        }

        warn!("Session {} {} failed: {}", session_id, stage, error);
        self.emit_fault_diagnostic(&fault);
        self.inner.failure_router.route(&info, &fault).await;
    }

    fn emit_fault_diagnostic(&self, fault: &Fault) {
        let mut event = DiagnosticEvent::new(
            self.inner.local_session_id.clone(),
            fault.kind.category(),
            Severity::Error,
            fault.kind.code(),
        )
        .with_context("message", fault.message.clone())
        .with_context("fault_id", fault.id.to_string());

        if let Some(stage) = fault.stage {
            event = event.with_context("stage", stage.engine_function());
        }
        if let Some(originator) = &fault.originator {
            event = event.with_context("originator", originator.clone());
        }
        if let Some(code) = fault.status_code {
            event = event.with_value(code as f64);
        }
        if fault.kind == FaultKind::MediaAcquisitionFailure {
            event = event.with_hint("check microphone permissions and availability");
        }
        self.inner.collaborators.diagnostics.emit(event);
    }

    // ===== TEARDOWN =====

    /// Stop and release the stats collector; no-op when already released
    pub fn clear_call_stats(&self) {
        let stats = self.inner.state.lock().stats.take();
        if let Some(stats) = stats {
            stats.clear_timers();
            stats.stop();
            debug!("Session {} call stats released", self.inner.local_session_id);
        }
    }

    fn release_resources(&self) {
        self.inner.ice_monitor.disarm();
        self.clear_call_stats();

        let (stop_streaming, task) = {
            let mut st = self.inner.state.lock();
            (
                std::mem::replace(&mut st.volume_streaming, false),
                st.one_way_audio_task.take(),
            )
        };
        if let Some(task) = task {
            task.abort();
        }
        if stop_streaming {
            self.inner
                .collaborators
                .devices
                .stop_volume_streaming(&self.inner.local_session_id);
        }
    }

    /// Release everything the session holds
    ///
    /// After this the ICE watchdog can no longer fire.
    pub fn destroy(&self) {
        self.inner.state.lock().destroyed = true;
        self.release_resources();
        debug!("Session {} destroyed", self.inner.local_session_id);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("CallSession")
            .field("local_session_id", &self.inner.local_session_id)
            .field("id", &st.id)
            .field("direction", &self.inner.direction)
            .field("state", &st.call_state)
            .field("stages", &st.timeline.stages().len())
            .finish()
    }
}
