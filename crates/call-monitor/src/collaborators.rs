//! External collaborator interfaces
//!
//! A [`CallSession`](crate::session::CallSession) observes a call but does
//! not own the machinery that carries it. Everything it talks to is behind
//! one of the traits in this module:
//!
//! ```text
//!                    ┌───────────────────┐
//!  TransportSession ─▶                   ├─▶ CallEventHandler   (answered / terminated)
//!                    │    CallSession    ├─▶ DiagnosticsSink    (tagged warnings)
//!  AudioDeviceLayer ◀─                   ├─▶ FaultReporter      (via FailureRouter)
//!                    │                   ├─▶ StatsEngine        (fabric events, errors)
//!  RtpStatsFactory  ◀─                   ├─▶ OneWayAudioDetector
//!                    └───────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EncodingParameters;
use crate::diagnostics::DiagnosticsSink;
use crate::error::CallMonitorResult;
use crate::failure::FaultReporter;
use crate::types::{AudioDevicesInfo, CallInfo, IceGatheringState, LocalSessionId};

/// The transport engine's view of the session being observed
pub trait TransportSession: Send + Sync {
    /// Current ICE gathering state of the session's media connection
    fn ice_gathering_state(&self) -> IceGatheringState;

    /// Let the engine stop waiting for more candidates and proceed
    fn mark_gathering_ready(&self);

    /// Apply sender encoding parameters to the media connection
    fn apply_encoding_parameters(&self, params: &EncodingParameters);

    /// Enable or disable the engine's RTP inactivity timeout
    fn set_rtp_timeout_enabled(&self, enabled: bool);

    /// Identifier of the active media connection, if one exists
    fn media_connection_id(&self) -> Option<String>;
}

/// RTP/media statistics sampler bound to one session
pub trait RtpStatsCollector: Send + Sync {
    fn start(&self);
    fn stop(&self);
    /// Cancel the sampler's periodic stats and audio-level timers
    fn clear_timers(&self);
}

/// Creates an [`RtpStatsCollector`] for a confirmed session
pub trait RtpStatsFactory: Send + Sync {
    fn create(&self, call: &CallInfo) -> Arc<dyn RtpStatsCollector>;
}

/// Lifecycle markers reported to the stats engine
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FabricEvent {
    FabricSetup,
    FabricTerminated,
}

/// External stats/reporting engine
#[async_trait]
pub trait StatsEngine: Send + Sync {
    /// Identity registered with the engine; errors are only tagged when present
    fn identity(&self) -> Option<String>;

    async fn send_fabric_event(&self, connection_id: &str, event: FabricEvent);

    /// Report an error raised by the named engine function
    async fn report_error(&self, connection_id: &str, function: &str, error: &str);
}

/// Audio device layer
#[async_trait]
pub trait AudioDeviceLayer: Send + Sync {
    /// Enumerate audio devices; may fail (permissions, platform errors)
    async fn get_audio_devices_info(&self) -> CallMonitorResult<AudioDevicesInfo>;

    fn start_volume_streaming(&self, session: &LocalSessionId);

    fn stop_volume_streaming(&self, session: &LocalSessionId);

    /// Stop any local ringtone or ringback that is playing
    fn stop_ringtone(&self);
}

/// Outward consumer of session-level notifications
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    async fn on_call_answered(&self, call: CallInfo);

    async fn on_call_terminated(&self, call: CallInfo);
}

/// Detector watching an established media connection for one-way audio
pub trait OneWayAudioDetector: Send + Sync {
    fn start(&self, call: &CallInfo, media_connection_id: &str);
}

/// Everything a [`CallSession`](crate::session::CallSession) talks to
#[derive(Clone)]
pub struct SessionCollaborators {
    pub transport: Arc<dyn TransportSession>,
    pub devices: Arc<dyn AudioDeviceLayer>,
    pub events: Arc<dyn CallEventHandler>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    pub faults: Arc<dyn FaultReporter>,
    pub rtp_stats: Arc<dyn RtpStatsFactory>,
    pub stats_engine: Option<Arc<dyn StatsEngine>>,
    pub one_way_audio: Option<Arc<dyn OneWayAudioDetector>>,
}

impl SessionCollaborators {
    pub fn new(
        transport: Arc<dyn TransportSession>,
        devices: Arc<dyn AudioDeviceLayer>,
        events: Arc<dyn CallEventHandler>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        faults: Arc<dyn FaultReporter>,
        rtp_stats: Arc<dyn RtpStatsFactory>,
    ) -> Self {
        Self {
            transport,
            devices,
            events,
            diagnostics,
            faults,
            rtp_stats,
            stats_engine: None,
            one_way_audio: None,
        }
    }

    pub fn with_stats_engine(mut self, engine: Arc<dyn StatsEngine>) -> Self {
        self.stats_engine = Some(engine);
        self
    }

    pub fn with_one_way_audio_detector(mut self, detector: Arc<dyn OneWayAudioDetector>) -> Self {
        self.one_way_audio = Some(detector);
        self
    }
}

impl std::fmt::Debug for SessionCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCollaborators")
            .field("stats_engine", &self.stats_engine.is_some())
            .field("one_way_audio", &self.one_way_audio.is_some())
            .finish_non_exhaustive()
    }
}
