//! Call monitor configuration
//!
//! [`CallMonitorConfig`] carries the timing constants and per-session media
//! adjustments a [`CallSession`](crate::session::CallSession) applies. It can
//! be built in code with the `with_*` methods or loaded from YAML:
//!
//! ```rust
//! use rvoip_call_monitor::config::CallMonitorConfig;
//!
//! let config = CallMonitorConfig::from_yaml_str(
//!     "ice_gathering_timeout_ms: 3000\ndisable_rtp_timeout: true\n",
//! )
//! .unwrap();
//!
//! assert_eq!(config.ice_gathering_timeout_ms, 3000);
//! assert!(config.disable_rtp_timeout);
//! assert_eq!(config.one_way_audio_check_delay_ms, 5000);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallMonitorError, CallMonitorResult};

/// Default wait for ICE gathering after the first host candidate
pub const DEFAULT_ICE_GATHERING_TIMEOUT_MS: u64 = 2_000;

/// Default delay between confirmation and starting the one-way-audio detector
pub const DEFAULT_ONE_WAY_AUDIO_CHECK_DELAY_MS: u64 = 5_000;

/// Upper bound accepted for the ICE gathering timeout
pub const MAX_ICE_GATHERING_TIMEOUT_MS: u64 = 60_000;

/// Network priority hint for outgoing media (WebRTC `RTCPriorityType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPriority {
    VeryLow,
    Low,
    Medium,
    High,
}

/// Sender encoding adjustments applied once the call is confirmed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParameters {
    pub max_bitrate_bps: Option<u32>,
    pub network_priority: Option<NetworkPriority>,
}

impl EncodingParameters {
    pub fn is_empty(&self) -> bool {
        self.max_bitrate_bps.is_none() && self.network_priority.is_none()
    }
}

/// Configuration for call session tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallMonitorConfig {
    /// How long to wait for ICE gathering after the first host candidate
    pub ice_gathering_timeout_ms: u64,
    /// Delay between confirmation and starting one-way-audio detection
    pub one_way_audio_check_delay_ms: u64,
    /// Disable the transport engine's RTP inactivity timeout for this call
    pub disable_rtp_timeout: bool,
    /// Encoding adjustments applied on confirmation
    pub encoding_parameters: Option<EncodingParameters>,
    /// Report to the stats engine when one is bound
    pub stats_engine_enabled: bool,
    /// Headers copied into every `CallInfo` snapshot
    pub extra_headers: HashMap<String, String>,
}

impl Default for CallMonitorConfig {
    fn default() -> Self {
        Self {
            ice_gathering_timeout_ms: DEFAULT_ICE_GATHERING_TIMEOUT_MS,
            one_way_audio_check_delay_ms: DEFAULT_ONE_WAY_AUDIO_CHECK_DELAY_MS,
            disable_rtp_timeout: false,
            encoding_parameters: None,
            stats_engine_enabled: true,
            extra_headers: HashMap::new(),
        }
    }
}

impl CallMonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a configuration from YAML
    pub fn from_yaml_str(yaml: &str) -> CallMonitorResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_ice_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.ice_gathering_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_one_way_audio_check_delay(mut self, delay: Duration) -> Self {
        self.one_way_audio_check_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_rtp_timeout_disabled(mut self, disabled: bool) -> Self {
        self.disable_rtp_timeout = disabled;
        self
    }

    pub fn with_encoding_parameters(mut self, params: EncodingParameters) -> Self {
        self.encoding_parameters = Some(params);
        self
    }

    pub fn with_stats_engine_enabled(mut self, enabled: bool) -> Self {
        self.stats_engine_enabled = enabled;
        self
    }

    pub fn with_extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }

    pub fn one_way_audio_check_delay(&self) -> Duration {
        Duration::from_millis(self.one_way_audio_check_delay_ms)
    }

    pub fn validate(&self) -> CallMonitorResult<()> {
        if self.ice_gathering_timeout_ms == 0 {
            return Err(CallMonitorError::config("ice_gathering_timeout_ms must be greater than 0"));
        }
        if self.ice_gathering_timeout_ms > MAX_ICE_GATHERING_TIMEOUT_MS {
            return Err(CallMonitorError::config(format!(
                "ice_gathering_timeout_ms must not exceed {}",
                MAX_ICE_GATHERING_TIMEOUT_MS
            )));
        }
        if self.one_way_audio_check_delay_ms == 0 {
            return Err(CallMonitorError::config(
                "one_way_audio_check_delay_ms must be greater than 0",
            ));
        }
        if let Some(params) = &self.encoding_parameters {
            if params.max_bitrate_bps == Some(0) {
                return Err(CallMonitorError::config("max_bitrate_bps must be greater than 0"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CallMonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice_gathering_timeout(), Duration::from_secs(2));
        assert!(config.stats_engine_enabled);
        assert!(!config.disable_rtp_timeout);
    }

    #[test]
    fn test_builder_methods() {
        let config = CallMonitorConfig::new()
            .with_ice_gathering_timeout(Duration::from_millis(1500))
            .with_one_way_audio_check_delay(Duration::from_secs(8))
            .with_rtp_timeout_disabled(true)
            .with_encoding_parameters(EncodingParameters {
                max_bitrate_bps: Some(64_000),
                network_priority: Some(NetworkPriority::High),
            })
            .with_extra_header("X-Tenant", "acme");

        assert_eq!(config.ice_gathering_timeout_ms, 1500);
        assert_eq!(config.one_way_audio_check_delay_ms, 8000);
        assert!(config.disable_rtp_timeout);
        assert_eq!(config.extra_headers.get("X-Tenant").map(String::as_str), Some("acme"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_encoding_parameters() {
        let yaml = r#"
ice_gathering_timeout_ms: 2500
encoding_parameters:
  max_bitrate_bps: 32000
  network_priority: very-low
extra_headers:
  X-Call-Source: softphone
"#;
        let config = CallMonitorConfig::from_yaml_str(yaml).unwrap();
        let params = config.encoding_parameters.unwrap();
        assert_eq!(params.max_bitrate_bps, Some(32000));
        assert_eq!(params.network_priority, Some(NetworkPriority::VeryLow));
        assert_eq!(config.extra_headers["X-Call-Source"], "softphone");
    }

    #[test]
    fn test_validation_failures() {
        assert!(CallMonitorConfig::from_yaml_str("ice_gathering_timeout_ms: 0").is_err());
        assert!(CallMonitorConfig::from_yaml_str("ice_gathering_timeout_ms: 120000").is_err());
        assert!(CallMonitorConfig::from_yaml_str("one_way_audio_check_delay_ms: 0").is_err());
        assert!(CallMonitorConfig::from_yaml_str("ice_gathering_timeout_ms: [").is_err());

        let config = CallMonitorConfig::new().with_encoding_parameters(EncodingParameters {
            max_bitrate_bps: Some(0),
            network_priority: None,
        });
        assert!(matches!(config.validate(), Err(CallMonitorError::Configuration { .. })));
    }
}
