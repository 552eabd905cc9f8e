// src/events.rs
//
// Event fan-out for the call session.
//
// Every change the UI needs to react to (tracks appearing or going away,
// layout switches, dimension changes, remote video toggles, participants
// leaving) is represented as a `CallEvent`. A single `EventBus` backed by a
// `tokio::sync::broadcast` channel delivers each event to every subscriber,
// so any number of views can observe the session side by side.
//
// ────────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::layout::{GridSize, LayoutMode};
use crate::track::{Dimensions, TrackInfo};

// ─── Event types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "track.subscribed")]
    TrackSubscribed,
    #[serde(rename = "track.unsubscribed")]
    TrackUnsubscribed,
    #[serde(rename = "layout.changed")]
    LayoutChanged,
    #[serde(rename = "track.dimensions_changed")]
    DimensionsChanged,
    #[serde(rename = "participant.video_enabled")]
    ParticipantVideoEnabled,
    #[serde(rename = "participant.left")]
    ParticipantLeft,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrackSubscribed => "track.subscribed",
            Self::TrackUnsubscribed => "track.unsubscribed",
            Self::LayoutChanged => "layout.changed",
            Self::DimensionsChanged => "track.dimensions_changed",
            Self::ParticipantVideoEnabled => "participant.video_enabled",
            Self::ParticipantLeft => "participant.left",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Event payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRemovedPayload {
    pub identity: String,
    pub track_sid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutPayload {
    pub layout_mode: LayoutMode,
    pub grid_size: GridSize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionsPayload {
    pub identity: String,
    pub track_sid: String,
    pub dimensions: Dimensions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoEnabledPayload {
    pub identity: String,
    pub track_sid: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantLeftPayload {
    pub identity: String,
    /// Sids of the video tracks dropped with the participant.
    pub track_sids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Track(TrackInfo),
    TrackRemoved(TrackRemovedPayload),
    Layout(LayoutPayload),
    Dimensions(DimensionsPayload),
    VideoEnabled(VideoEnabledPayload),
    ParticipantLeft(ParticipantLeftPayload),
}

// ─── The event envelope ─────────────────────────────────────────────────────

/// A self-describing call event.
///
/// ```json
/// {
///   "id":         "evt_a1b2c3d4-…",
///   "type":       "layout.changed",
///   "created_at": "2026-03-02T10:15:00Z",
///   "data": { "layout_mode": "speaker", "grid_size": { "rows": 1, "cols": 2 } }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct CallEvent {
    /// Unique event identifier (format: `evt_<uuid-v4>`).
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: EventType,

    pub created_at: DateTime<Utc>,

    pub data: EventPayload,
}

impl CallEvent {
    // ── Constructors ────────────────────────────────────────────────────

    pub fn track_subscribed(track: TrackInfo) -> Self {
        Self::new(EventType::TrackSubscribed, EventPayload::Track(track))
    }

    pub fn track_unsubscribed(identity: &str, track_sid: &str) -> Self {
        Self::new(
            EventType::TrackUnsubscribed,
            EventPayload::TrackRemoved(TrackRemovedPayload {
                identity: identity.to_string(),
                track_sid: track_sid.to_string(),
            }),
        )
    }

    pub fn layout_changed(layout_mode: LayoutMode, grid_size: GridSize) -> Self {
        Self::new(
            EventType::LayoutChanged,
            EventPayload::Layout(LayoutPayload {
                layout_mode,
                grid_size,
            }),
        )
    }

    pub fn dimensions_changed(identity: &str, track_sid: &str, dimensions: Dimensions) -> Self {
        Self::new(
            EventType::DimensionsChanged,
            EventPayload::Dimensions(DimensionsPayload {
                identity: identity.to_string(),
                track_sid: track_sid.to_string(),
                dimensions,
            }),
        )
    }

    pub fn participant_video_enabled(identity: &str, track_sid: &str, enabled: bool) -> Self {
        Self::new(
            EventType::ParticipantVideoEnabled,
            EventPayload::VideoEnabled(VideoEnabledPayload {
                identity: identity.to_string(),
                track_sid: track_sid.to_string(),
                enabled,
            }),
        )
    }

    pub fn participant_left(identity: &str, track_sids: Vec<String>) -> Self {
        Self::new(
            EventType::ParticipantLeft,
            EventPayload::ParticipantLeft(ParticipantLeftPayload {
                identity: identity.to_string(),
                track_sids,
            }),
        )
    }

    // ── Private ─────────────────────────────────────────────────────────

    fn new(event_type: EventType, data: EventPayload) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            event_type,
            created_at: Utc::now(),
            data,
        }
    }

    /// Identity of the participant the event concerns, if any.
    pub fn identity(&self) -> Option<&str> {
        match &self.data {
            EventPayload::Track(t) => Some(t.identity()),
            EventPayload::TrackRemoved(p) => Some(&p.identity),
            EventPayload::Dimensions(p) => Some(&p.identity),
            EventPayload::VideoEnabled(p) => Some(&p.identity),
            EventPayload::ParticipantLeft(p) => Some(&p.identity),
            EventPayload::Layout(_) => None,
        }
    }
}

// ─── EventBus ───────────────────────────────────────────────────────────────

/// Broadcast-based fan-out channel for `CallEvent`.
///
/// Subscribers that fall more than `capacity` events behind skip ahead
/// (`broadcast::error::RecvError::Lagged`). Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CallEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(cap: usize) -> Self {
        let (tx, _) = broadcast::channel(cap);
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that will
    /// receive it; zero subscribers is not an error.
    pub fn emit(&self, event: CallEvent) -> usize {
        debug!(event_type = %event.event_type, event_id = %event.id, "call event emitted");
        self.tx.send(event).unwrap_or(0)
    }

    /// New receiver seeing every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
