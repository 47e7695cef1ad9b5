//! Recording doubles for every collaborator a call session talks to
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use rvoip_call_monitor::collaborators::{
    AudioDeviceLayer, CallEventHandler, FabricEvent, OneWayAudioDetector, RtpStatsCollector,
    RtpStatsFactory, SessionCollaborators, StatsEngine, TransportSession,
};
use rvoip_call_monitor::config::{CallMonitorConfig, EncodingParameters};
use rvoip_call_monitor::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use rvoip_call_monitor::error::{CallMonitorError, CallMonitorResult};
use rvoip_call_monitor::failure::{Fault, FaultKind, FaultReporter};
use rvoip_call_monitor::ice::{CandidateType, IceCandidate, IceCandidateEvent};
use rvoip_call_monitor::session::CallSession;
use rvoip_call_monitor::types::{
    AudioDevice, AudioDevicesInfo, CallDirection, CallInfo, IceGatheringState, LocalSessionId,
};

pub const MEDIA_CONNECTION_ID: &str = "pc-0001";

pub struct RecordingTransport {
    pub gathering_state: Mutex<IceGatheringState>,
    pub ready_signals: AtomicUsize,
    pub encoding: Mutex<Vec<EncodingParameters>>,
    pub rtp_timeout_enabled: Mutex<Option<bool>>,
    pub connection_id: Mutex<Option<String>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            gathering_state: Mutex::new(IceGatheringState::Gathering),
            ready_signals: AtomicUsize::new(0),
            encoding: Mutex::new(Vec::new()),
            rtp_timeout_enabled: Mutex::new(None),
            connection_id: Mutex::new(Some(MEDIA_CONNECTION_ID.to_string())),
        }
    }
}

impl RecordingTransport {
    pub fn ready_count(&self) -> usize {
        self.ready_signals.load(Ordering::SeqCst)
    }
}

impl TransportSession for RecordingTransport {
    fn ice_gathering_state(&self) -> IceGatheringState {
        *self.gathering_state.lock()
    }

    fn mark_gathering_ready(&self) {
        self.ready_signals.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_encoding_parameters(&self, params: &EncodingParameters) {
        self.encoding.lock().push(params.clone());
    }

    fn set_rtp_timeout_enabled(&self, enabled: bool) {
        *self.rtp_timeout_enabled.lock() = Some(enabled);
    }

    fn media_connection_id(&self) -> Option<String> {
        self.connection_id.lock().clone()
    }
}

#[derive(Default)]
pub struct RecordingDevices {
    pub fail_query: bool,
    pub queries: AtomicUsize,
    pub streaming_started: AtomicUsize,
    pub streaming_stopped: AtomicUsize,
    pub ringtone_stops: AtomicUsize,
}

impl RecordingDevices {
    pub fn failing() -> Self {
        Self {
            fail_query: true,
            ..Default::default()
        }
    }

    pub fn inventory() -> AudioDevicesInfo {
        AudioDevicesInfo {
            inputs: vec![AudioDevice {
                id: "mic-1".to_string(),
                label: "Built-in Microphone".to_string(),
            }],
            outputs: vec![AudioDevice {
                id: "spk-1".to_string(),
                label: "Built-in Speakers".to_string(),
            }],
            selected_input: Some("mic-1".to_string()),
            selected_output: Some("spk-1".to_string()),
        }
    }
}

#[async_trait]
impl AudioDeviceLayer for RecordingDevices {
    async fn get_audio_devices_info(&self) -> CallMonitorResult<AudioDevicesInfo> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_query {
            return Err(CallMonitorError::device("enumerateDevices rejected"));
        }
        Ok(Self::inventory())
    }

    fn start_volume_streaming(&self, _session: &LocalSessionId) {
        self.streaming_started.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_volume_streaming(&self, _session: &LocalSessionId) {
        self.streaming_stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_ringtone(&self) {
        self.ringtone_stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub answered: Mutex<Vec<CallInfo>>,
    pub terminated: Mutex<Vec<CallInfo>>,
}

#[async_trait]
impl CallEventHandler for RecordingEvents {
    async fn on_call_answered(&self, call: CallInfo) {
        self.answered.lock().push(call);
    }

    async fn on_call_terminated(&self, call: CallInfo) {
        self.terminated.lock().push(call);
    }
}

#[derive(Default)]
pub struct RecordingDiagnostics {
    pub events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingDiagnostics {
    pub fn count(&self, code: &str) -> usize {
        self.events.lock().iter().filter(|e| e.code == code).count()
    }

    pub fn find(&self, code: &str) -> Option<DiagnosticEvent> {
        self.events.lock().iter().find(|e| e.code == code).cloned()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn emit(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Default)]
pub struct RecordingFaults {
    pub reports: Mutex<Vec<(&'static str, Fault)>>,
}

impl RecordingFaults {
    pub fn kinds(&self) -> Vec<FaultKind> {
        self.reports.lock().iter().map(|(_, fault)| fault.kind).collect()
    }

    pub fn reporters(&self) -> Vec<&'static str> {
        self.reports.lock().iter().map(|(name, _)| *name).collect()
    }
}

#[async_trait]
impl FaultReporter for RecordingFaults {
    async fn report_ice_timeout(&self, _call: &CallInfo, fault: &Fault) {
        self.reports.lock().push(("ice_timeout", fault.clone()));
    }

    async fn report_media_failure(&self, _call: &CallInfo, fault: &Fault) {
        self.reports.lock().push(("media_failure", fault.clone()));
    }

    async fn report_sdp_failure(&self, _call: &CallInfo, fault: &Fault) {
        self.reports.lock().push(("sdp_failure", fault.clone()));
    }

    async fn report_signalling_failure(&self, _call: &CallInfo, fault: &Fault) {
        self.reports.lock().push(("signalling_failure", fault.clone()));
    }
}

#[derive(Default)]
pub struct RecordingCollector {
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub timers_cleared: AtomicUsize,
}

impl RtpStatsCollector for RecordingCollector {
    fn start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_timers(&self) {
        self.timers_cleared.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingStatsFactory {
    pub collectors: Mutex<Vec<Arc<RecordingCollector>>>,
}

impl RecordingStatsFactory {
    pub fn created(&self) -> usize {
        self.collectors.lock().len()
    }

    pub fn last(&self) -> Option<Arc<RecordingCollector>> {
        self.collectors.lock().last().cloned()
    }
}

impl RtpStatsFactory for RecordingStatsFactory {
    fn create(&self, _call: &CallInfo) -> Arc<dyn RtpStatsCollector> {
        let collector = Arc::new(RecordingCollector::default());
        self.collectors.lock().push(collector.clone());
        collector
    }
}

/// Factory whose `create` parks until the test lets it go
pub struct BlockingStatsFactory {
    pub entered: Arc<Barrier>,
    pub release: Arc<Barrier>,
    pub collectors: Mutex<Vec<Arc<RecordingCollector>>>,
}

impl BlockingStatsFactory {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Barrier::new(2)),
            release: Arc::new(Barrier::new(2)),
            collectors: Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> Option<Arc<RecordingCollector>> {
        self.collectors.lock().last().cloned()
    }
}

impl RtpStatsFactory for BlockingStatsFactory {
    fn create(&self, _call: &CallInfo) -> Arc<dyn RtpStatsCollector> {
        self.entered.wait();
        self.release.wait();
        let collector = Arc::new(RecordingCollector::default());
        self.collectors.lock().push(collector.clone());
        collector
    }
}

#[derive(Default)]
pub struct RecordingStatsEngine {
    pub identity: Option<String>,
    pub fabric_events: Mutex<Vec<(String, FabricEvent)>>,
    pub errors: Mutex<Vec<(String, String, String)>>,
}

impl RecordingStatsEngine {
    pub fn with_identity(identity: &str) -> Self {
        Self {
            identity: Some(identity.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl StatsEngine for RecordingStatsEngine {
    fn identity(&self) -> Option<String> {
        self.identity.clone()
    }

    async fn send_fabric_event(&self, connection_id: &str, event: FabricEvent) {
        self.fabric_events.lock().push((connection_id.to_string(), event));
    }

    async fn report_error(&self, connection_id: &str, function: &str, error: &str) {
        self.errors.lock().push((
            connection_id.to_string(),
            function.to_string(),
            error.to_string(),
        ));
    }
}

#[derive(Default)]
pub struct RecordingOneWayAudio {
    pub starts: Mutex<Vec<(LocalSessionId, String)>>,
}

impl OneWayAudioDetector for RecordingOneWayAudio {
    fn start(&self, call: &CallInfo, media_connection_id: &str) {
        self.starts
            .lock()
            .push((call.local_session_id.clone(), media_connection_id.to_string()));
    }
}

/// All doubles wired together
pub struct Harness {
    pub transport: Arc<RecordingTransport>,
    pub devices: Arc<RecordingDevices>,
    pub events: Arc<RecordingEvents>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    pub faults: Arc<RecordingFaults>,
    pub stats: Arc<RecordingStatsFactory>,
    pub engine: Arc<RecordingStatsEngine>,
    pub one_way_audio: Arc<RecordingOneWayAudio>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_devices(RecordingDevices::default())
    }

    pub fn with_devices(devices: RecordingDevices) -> Self {
        Self {
            transport: Arc::new(RecordingTransport::default()),
            devices: Arc::new(devices),
            events: Arc::new(RecordingEvents::default()),
            diagnostics: Arc::new(RecordingDiagnostics::default()),
            faults: Arc::new(RecordingFaults::default()),
            stats: Arc::new(RecordingStatsFactory::default()),
            engine: Arc::new(RecordingStatsEngine::with_identity("softphone-user")),
            one_way_audio: Arc::new(RecordingOneWayAudio::default()),
        }
    }

    pub fn with_engine(mut self, engine: RecordingStatsEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn collaborators(&self) -> SessionCollaborators {
        SessionCollaborators::new(
            self.transport.clone(),
            self.devices.clone(),
            self.events.clone(),
            self.diagnostics.clone(),
            self.faults.clone(),
            self.stats.clone(),
        )
        .with_stats_engine(self.engine.clone())
        .with_one_way_audio_detector(self.one_way_audio.clone())
    }

    pub fn session_with(&self, id: &str, config: CallMonitorConfig) -> CallSession {
        CallSession::new(
            LocalSessionId::from(id),
            CallDirection::Outbound,
            "sip:alice@example.com",
            "sip:bob@example.com",
            config,
            self.collaborators(),
        )
    }

    pub fn session_with_stats(&self, id: &str, factory: Arc<dyn RtpStatsFactory>) -> CallSession {
        let mut collaborators = self.collaborators();
        collaborators.rtp_stats = factory;
        CallSession::new(
            LocalSessionId::from(id),
            CallDirection::Outbound,
            "sip:alice@example.com",
            "sip:bob@example.com",
            CallMonitorConfig::default(),
            collaborators,
        )
    }

    pub fn outbound(&self) -> CallSession {
        self.session_with("session-1", CallMonitorConfig::default())
    }

    pub fn answered(&self) -> usize {
        self.events.answered.lock().len()
    }

    pub fn terminated(&self) -> usize {
        self.events.terminated.lock().len()
    }
}

pub fn candidate(kind: CandidateType) -> IceCandidateEvent {
    let line = format!(
        "candidate:1 1 udp 2122260223 192.168.1.10 50000 typ {}",
        kind
    );
    match IceCandidate::parse(&line) {
        Ok(candidate) => IceCandidateEvent::Candidate(candidate),
        Err(e) => panic!("test candidate did not parse: {}", e),
    }
}

/// Let spawned tasks run to completion
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Advance (paused) time past `ms` and let woken tasks finish
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}
