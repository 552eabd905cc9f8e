use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// TrackSource / TrackKind
// ---------------------------------------------------------------------------

/// Where a published track comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
    Unknown,
}

impl TrackSource {
    pub fn is_screen_share(&self) -> bool {
        matches!(self, Self::ScreenShare | Self::ScreenShareAudio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

// ---------------------------------------------------------------------------
// TrackHandle
// ---------------------------------------------------------------------------

/// Opaque, cheap-to-clone handle on a media track owned by the media room.
///
/// Two handles are equal only when they refer to the same underlying track
/// object; a re-published track with the same sid is a different handle.
#[derive(Debug, Clone)]
pub struct TrackHandle(Arc<TrackHandleInner>);

#[derive(Debug)]
struct TrackHandleInner {
    sid: String,
    kind: TrackKind,
    source: TrackSource,
}

impl TrackHandle {
    pub fn new(sid: impl Into<String>, kind: TrackKind, source: TrackSource) -> Self {
        Self(Arc::new(TrackHandleInner {
            sid: sid.into(),
            kind,
            source,
        }))
    }

    pub fn sid(&self) -> &str {
        &self.0.sid
    }

    pub fn kind(&self) -> TrackKind {
        self.0.kind
    }

    pub fn source(&self) -> TrackSource {
        self.0.source
    }
}

impl PartialEq for TrackHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TrackHandle {}

impl Serialize for TrackHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.sid())
    }
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Identity plus display name of a track's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub identity: String,
    pub name: String,
}

impl ParticipantRef {
    /// Falls back to the identity when no display name is known.
    pub fn new(identity: impl Into<String>, name: Option<&str>) -> Self {
        let identity = identity.into();
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => identity.clone(),
        };
        Self { identity, name }
    }
}

/// A track as published by the media room.
#[derive(Debug, Clone)]
pub struct TrackPublication {
    pub track_sid: String,
    pub track: TrackHandle,
    pub source: TrackSource,
    pub dimensions: Option<Dimensions>,
}

impl TrackPublication {
    pub fn new(track: TrackHandle) -> Self {
        Self {
            track_sid: track.sid().to_string(),
            source: track.source(),
            track,
            dimensions: None,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.track.kind()
    }
}

// ---------------------------------------------------------------------------
// TrackInfo
// ---------------------------------------------------------------------------

/// One rendered video track in the call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub track_sid: String,
    pub participant: ParticipantRef,
    pub track: TrackHandle,
    pub is_local: bool,
    pub is_screen_share: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

impl TrackInfo {
    pub fn from_publication(
        participant: ParticipantRef,
        publication: &TrackPublication,
        is_local: bool,
    ) -> Self {
        Self {
            track_sid: publication.track_sid.clone(),
            participant,
            track: publication.track.clone(),
            is_local,
            is_screen_share: publication.source.is_screen_share(),
            dimensions: publication.dimensions,
        }
    }

    pub fn identity(&self) -> &str {
        &self.participant.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_equality_is_by_identity() {
        let a = TrackHandle::new("TR_1", TrackKind::Video, TrackSource::Camera);
        let b = TrackHandle::new("TR_1", TrackKind::Video, TrackSource::Camera);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn participant_name_falls_back_to_identity() {
        assert_eq!(ParticipantRef::new("@bob", None).name, "@bob");
        assert_eq!(ParticipantRef::new("@bob", Some("")).name, "@bob");
        assert_eq!(ParticipantRef::new("@bob", Some("Bob")).name, "Bob");
    }

    #[test]
    fn screen_share_flag_follows_source() {
        let screen = TrackPublication::new(TrackHandle::new(
            "TR_s",
            TrackKind::Video,
            TrackSource::ScreenShare,
        ));
        let info = TrackInfo::from_publication(ParticipantRef::new("@a", None), &screen, false);
        assert!(info.is_screen_share);
        assert!(!info.is_local);
        assert_eq!(info.track_sid, "TR_s");
    }

    #[test]
    fn track_info_serializes_handle_as_sid() {
        let publication = TrackPublication::new(TrackHandle::new(
            "TR_cam",
            TrackKind::Video,
            TrackSource::Camera,
        ));
        let info = TrackInfo::from_publication(ParticipantRef::new("@a", Some("A")), &publication, true);
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["track"], "TR_cam");
        assert_eq!(value["participant"]["name"], "A");
        assert!(value.get("dimensions").is_none());
    }
}
