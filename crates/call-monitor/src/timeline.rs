//! Signalling timeline and media connection record
//!
//! The timeline is the append-only record of what happened to a call and
//! when. It holds three things:
//!
//! - **stages**: ordered milestone labels such as `confirmed@1700000000123`
//! - **signalling**: named signalling timestamps and hangup details, updated
//!   through [`SignallingUpdate`] with per-field last-write-wins merging
//! - **media connection info**: the time each media connection state was
//!   reached, updated through [`MediaConnectionUpdate`]
//!
//! The post-dial-delay end time is the one write-once field: the first ringing
//! indication wins and later ones are ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::MediaConnectionState;

/// Signalling timestamps and hangup details for a call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignallingInfo {
    pub call_initiation_time: Option<DateTime<Utc>>,
    /// First 180 Ringing
    pub ring_time: Option<DateTime<Utc>>,
    /// First 183 Session Progress
    pub progress_time: Option<DateTime<Utc>>,
    pub answer_time: Option<DateTime<Utc>>,
    pub call_confirmed_time: Option<DateTime<Utc>>,
    pub hangup_time: Option<DateTime<Utc>>,
    pub hangup_party: Option<String>,
    pub hangup_reason: Option<String>,
    pub call_duration_ms: Option<i64>,
    pub last_signalling_error: Option<String>,
}

/// Partial update for [`SignallingInfo`]
///
/// Fields left as `None` are not touched by [`SignallingInfo::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignallingUpdate {
    pub call_initiation_time: Option<DateTime<Utc>>,
    pub ring_time: Option<DateTime<Utc>>,
    pub progress_time: Option<DateTime<Utc>>,
    pub answer_time: Option<DateTime<Utc>>,
    pub call_confirmed_time: Option<DateTime<Utc>>,
    pub hangup_time: Option<DateTime<Utc>>,
    pub hangup_party: Option<String>,
    pub hangup_reason: Option<String>,
    pub call_duration_ms: Option<i64>,
    pub last_signalling_error: Option<String>,
}

impl SignallingUpdate {
    /// Update recording the hangup time, originator and cause
    pub fn hangup(at: DateTime<Utc>, party: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            hangup_time: Some(at),
            hangup_party: Some(party.into()),
            hangup_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

macro_rules! merge_present {
    ($target:expr, $update:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $update.$field {
                $target.$field = Some(value);
            }
        )+
    };
}

impl SignallingInfo {
    /// Shallow merge: every field present in `update` overwrites, the rest stay
    pub fn merge(&mut self, update: SignallingUpdate) {
        merge_present!(self, update;
            call_initiation_time,
            ring_time,
            progress_time,
            answer_time,
            call_confirmed_time,
            hangup_time,
            hangup_party,
            hangup_reason,
            call_duration_ms,
            last_signalling_error,
        );
    }
}

/// Partial update for the media connection record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConnectionUpdate {
    pub entries: Vec<(MediaConnectionState, DateTime<Utc>)>,
}

impl MediaConnectionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, state: MediaConnectionState, at: DateTime<Utc>) -> Self {
        self.entries.push((state, at));
        self
    }
}

/// Signalling record returned by `CallSession::get_signalling_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignallingReport {
    #[serde(flatten)]
    pub signalling: SignallingInfo,
    pub post_dial_delay_end_time: Option<DateTime<Utc>>,
    /// `(post_dial_delay_end_time or now) - call_initiation_time`, in milliseconds
    pub post_dial_delay_ms: Option<i64>,
}

/// Append-only milestone record for one call session
#[derive(Debug, Clone, Default)]
pub struct SignallingTimeline {
    stages: Vec<String>,
    signalling: SignallingInfo,
    media_connection: BTreeMap<MediaConnectionState, DateTime<Utc>>,
    post_dial_delay_end_time: Option<DateTime<Utc>>,
}

impl SignallingTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw stage label
    pub fn append(&mut self, stage: impl Into<String>) {
        self.stages.push(stage.into());
    }

    /// Append `label@<unix millis>`
    pub fn append_at(&mut self, label: &str, at: DateTime<Utc>) {
        self.append(format!("{}@{}", label, at.timestamp_millis()));
    }

    pub fn merge(&mut self, update: SignallingUpdate) {
        self.signalling.merge(update);
    }

    pub fn merge_media(&mut self, update: MediaConnectionUpdate) {
        for (state, at) in update.entries {
            self.media_connection.insert(state, at);
        }
    }

    /// Set the post-dial-delay end time if it has not been set yet
    ///
    /// Returns `true` when this call stored the value.
    pub fn set_post_dial_delay_end_time(&mut self, at: DateTime<Utc>) -> bool {
        if self.post_dial_delay_end_time.is_some() {
            return false;
        }
        self.post_dial_delay_end_time = Some(at);
        true
    }

    pub fn post_dial_delay_end_time(&self) -> Option<DateTime<Utc>> {
        self.post_dial_delay_end_time
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Whether any stage starts with `label@`
    pub fn has_stage(&self, label: &str) -> bool {
        let prefix = format!("{}@", label);
        self.stages.iter().any(|s| s.starts_with(&prefix) || s == label)
    }

    pub fn signalling(&self) -> &SignallingInfo {
        &self.signalling
    }

    pub fn media_connection(&self) -> &BTreeMap<MediaConnectionState, DateTime<Utc>> {
        &self.media_connection
    }

    /// Snapshot with the post-dial delay derived against `now`
    pub fn report(&self, now: DateTime<Utc>) -> SignallingReport {
        let post_dial_delay_ms = self.signalling.call_initiation_time.map(|initiated| {
            let end = self.post_dial_delay_end_time.unwrap_or(now);
            (end - initiated).num_milliseconds()
        });

        SignallingReport {
            signalling: self.signalling.clone(),
            post_dial_delay_end_time: self.post_dial_delay_end_time,
            post_dial_delay_ms,
        }
    }
}
