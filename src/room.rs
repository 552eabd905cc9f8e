//! Boundary with the media-room backend (a LiveKit room in production).
//!
//! The call service never touches transport or codecs; it asks the room to
//! publish or unpublish local capture and listens to the room's event stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::track::{Dimensions, ParticipantRef, TrackPublication};

// ---------------------------------------------------------------------------
// Capture options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Camera capture request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCaptureOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub resolution: Resolution,
    pub frame_rate: u32,
}

impl VideoCaptureOptions {
    /// Camera capture targets 720p at 30 fps.
    pub fn hd(device_id: Option<String>) -> Self {
        Self {
            device_id,
            resolution: Resolution {
                width: 1280,
                height: 720,
            },
            frame_rate: 30,
        }
    }
}

/// Microphone capture request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCaptureOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl AudioCaptureOptions {
    /// Voice processing (AEC, NS, AGC) all switched on.
    pub fn voice(device_id: Option<String>) -> Self {
        Self {
            device_id,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenShareCaptureOptions {
    /// Capture system audio alongside the screen.
    pub audio: bool,
}

// ---------------------------------------------------------------------------
// Room events
// ---------------------------------------------------------------------------

/// Events pushed by the media room after `connect`.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    TrackSubscribed {
        participant: ParticipantRef,
        publication: TrackPublication,
    },
    TrackUnsubscribed {
        participant: ParticipantRef,
        publication: TrackPublication,
    },
    ParticipantDisconnected {
        identity: String,
    },
    TrackDimensionsChanged {
        identity: String,
        track_sid: String,
        dimensions: Dimensions,
    },
    TrackMuted {
        participant: ParticipantRef,
        publication: TrackPublication,
    },
    TrackUnmuted {
        participant: ParticipantRef,
        publication: TrackPublication,
    },
}

impl RoomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TrackSubscribed { .. } => "track_subscribed",
            Self::TrackUnsubscribed { .. } => "track_unsubscribed",
            Self::ParticipantDisconnected { .. } => "participant_disconnected",
            Self::TrackDimensionsChanged { .. } => "track_dimensions_changed",
            Self::TrackMuted { .. } => "track_muted",
            Self::TrackUnmuted { .. } => "track_unmuted",
        }
    }
}

/// Receiving end of a connected room's event stream.
pub type RoomEvents = mpsc::UnboundedReceiver<RoomEvent>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Not connected to a room")]
    NotConnected,

    #[error("Already connected to a room. Disconnect first.")]
    AlreadyConnected,

    #[error("Failed to connect to room {room}: {reason}")]
    Connection { room: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// MediaRoom
// ---------------------------------------------------------------------------

/// Local participant as seen by the connected room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    pub identity: String,
    pub name: Option<String>,
}

impl LocalParticipant {
    pub fn to_participant_ref(&self) -> ParticipantRef {
        ParticipantRef::new(self.identity.clone(), self.name.as_deref())
    }
}

/// A media room connection (LiveKit `Room` or a stand-in).
///
/// The `set_*_enabled` methods return the resulting local publication when
/// enabling, `None` when disabling or when the backend produced no track.
#[async_trait]
pub trait MediaRoom: Send + Sync + 'static {
    /// Join `room_name` on the server at `url`, returning the room's event
    /// stream.
    async fn connect(&self, url: &str, room_name: &str, token: &str)
        -> Result<RoomEvents, RoomError>;

    async fn disconnect(&self) -> Result<(), RoomError>;

    /// `None` while not connected.
    fn local_participant(&self) -> Option<LocalParticipant>;

    async fn set_camera_enabled(
        &self,
        enabled: bool,
        options: Option<VideoCaptureOptions>,
    ) -> Result<Option<TrackPublication>, RoomError>;

    async fn set_microphone_enabled(
        &self,
        enabled: bool,
        options: Option<AudioCaptureOptions>,
    ) -> Result<Option<TrackPublication>, RoomError>;

    async fn set_screen_share_enabled(
        &self,
        enabled: bool,
        options: Option<ScreenShareCaptureOptions>,
    ) -> Result<Option<TrackPublication>, RoomError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_defaults() {
        let video = VideoCaptureOptions::hd(Some("cam-2".into()));
        assert_eq!(video.resolution, Resolution { width: 1280, height: 720 });
        assert_eq!(video.frame_rate, 30);
        assert_eq!(video.device_id.as_deref(), Some("cam-2"));

        let audio = AudioCaptureOptions::voice(None);
        assert!(audio.echo_cancellation && audio.noise_suppression && audio.auto_gain_control);
    }

    #[test]
    fn capture_options_json_omits_default_device() {
        let json = serde_json::to_value(VideoCaptureOptions::hd(None)).unwrap();
        assert!(json.get("device_id").is_none());
        assert_eq!(json["resolution"]["width"], 1280);
    }

    #[test]
    fn error_messages() {
        assert_eq!(RoomError::NotConnected.to_string(), "Not connected to a room");
        let err = RoomError::Connection {
            room: "!abc:matrix.org".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Failed to connect to room !abc:matrix.org: timeout");
    }
}
