//! In-memory media room for tests.
//!
//! `FakeRoom` publishes synthetic tracks, records the capture options it was
//! asked for, lets tests inject room events, and can be told to fail any
//! operation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::room::{
    AudioCaptureOptions, LocalParticipant, MediaRoom, RoomError, RoomEvent, RoomEvents,
    ScreenShareCaptureOptions, VideoCaptureOptions,
};
use crate::track::{ParticipantRef, TrackHandle, TrackKind, TrackPublication, TrackSource};

/// Operations a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Connect,
    Disconnect,
    EnableCamera,
    DisableCamera,
    EnableMicrophone,
    DisableMicrophone,
    StartScreenShare,
    StopScreenShare,
}

#[derive(Default)]
struct FakeRoomState {
    connected: bool,
    events_tx: Option<mpsc::UnboundedSender<RoomEvent>>,
    failures: HashMap<FakeOp, RoomError>,
    published: HashMap<TrackSource, TrackHandle>,
    withhold_publications: bool,
    publish_delay: Duration,
    last_connect: Option<(String, String, String)>,
    last_video_options: Option<VideoCaptureOptions>,
    last_audio_options: Option<AudioCaptureOptions>,
    last_screen_share_options: Option<ScreenShareCaptureOptions>,
    connect_calls: usize,
    disconnect_calls: usize,
    camera_publishes: usize,
    next_sid: u64,
}

pub struct FakeRoom {
    identity: String,
    name: Option<String>,
    state: Mutex<FakeRoomState>,
}

impl FakeRoom {
    pub fn new(identity: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            identity: identity.into(),
            name: name.map(str::to_string),
            state: Mutex::new(FakeRoomState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeRoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Test controls ───────────────────────────────────────────────────

    pub fn fail_on(&self, op: FakeOp, error: RoomError) {
        self.state().failures.insert(op, error);
    }

    pub fn clear_failure(&self, op: FakeOp) {
        self.state().failures.remove(&op);
    }

    /// Make enable calls succeed without producing a publication.
    pub fn withhold_publications(&self, withhold: bool) {
        self.state().withhold_publications = withhold;
    }

    /// Suspend every publish/unpublish for `delay` before it takes effect.
    pub fn set_publish_delay(&self, delay: Duration) {
        self.state().publish_delay = delay;
    }

    /// Push an event into the connected room's stream. Returns `false` when
    /// nobody is listening.
    pub fn emit(&self, event: RoomEvent) -> bool {
        match &self.state().events_tx {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    // ── Inspection ──────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn published(&self, source: TrackSource) -> Option<TrackHandle> {
        self.state().published.get(&source).cloned()
    }

    /// `(url, room_name, token)` of the last connect attempt.
    pub fn last_connect(&self) -> Option<(String, String, String)> {
        self.state().last_connect.clone()
    }

    pub fn last_video_options(&self) -> Option<VideoCaptureOptions> {
        self.state().last_video_options.clone()
    }

    pub fn last_audio_options(&self) -> Option<AudioCaptureOptions> {
        self.state().last_audio_options.clone()
    }

    pub fn last_screen_share_options(&self) -> Option<ScreenShareCaptureOptions> {
        self.state().last_screen_share_options.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.state().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state().disconnect_calls
    }

    pub fn camera_publishes(&self) -> usize {
        self.state().camera_publishes
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn check(&self, op: FakeOp) -> Result<(), RoomError> {
        let state = self.state();
        if let Some(err) = state.failures.get(&op) {
            return Err(err.clone());
        }
        if op != FakeOp::Connect && !state.connected {
            return Err(RoomError::NotConnected);
        }
        Ok(())
    }

    async fn toggle(
        &self,
        source: TrackSource,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<Option<TrackPublication>, RoomError> {
        let op = match (source, enabled) {
            (TrackSource::Camera, true) => FakeOp::EnableCamera,
            (TrackSource::Camera, false) => FakeOp::DisableCamera,
            (TrackSource::Microphone, true) => FakeOp::EnableMicrophone,
            (TrackSource::Microphone, false) => FakeOp::DisableMicrophone,
            (_, true) => FakeOp::StartScreenShare,
            (_, false) => FakeOp::StopScreenShare,
        };
        self.check(op)?;

        let delay = self.state().publish_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if !enabled {
            state.published.remove(&source);
            return Ok(None);
        }
        if state.withhold_publications {
            return Ok(None);
        }
        if source == TrackSource::Camera {
            state.camera_publishes += 1;
        }
        state.next_sid += 1;
        let handle = TrackHandle::new(format!("TR_local{:04}", state.next_sid), kind, source);
        state.published.insert(source, handle.clone());
        Ok(Some(TrackPublication::new(handle)))
    }
}

#[async_trait]
impl MediaRoom for FakeRoom {
    async fn connect(&self, url: &str, room_name: &str, token: &str) -> Result<RoomEvents, RoomError> {
        self.check(FakeOp::Connect)?;
        let mut state = self.state();
        state.connect_calls += 1;
        state.last_connect = Some((url.to_string(), room_name.to_string(), token.to_string()));
        if state.connected {
            return Err(RoomError::AlreadyConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.events_tx = Some(tx);
        state.connected = true;
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), RoomError> {
        let mut state = self.state();
        state.disconnect_calls += 1;
        if let Some(err) = state.failures.get(&FakeOp::Disconnect) {
            return Err(err.clone());
        }
        state.connected = false;
        state.events_tx = None;
        state.published.clear();
        Ok(())
    }

    fn local_participant(&self) -> Option<LocalParticipant> {
        self.state().connected.then(|| LocalParticipant {
            identity: self.identity.clone(),
            name: self.name.clone(),
        })
    }

    async fn set_camera_enabled(
        &self,
        enabled: bool,
        options: Option<VideoCaptureOptions>,
    ) -> Result<Option<TrackPublication>, RoomError> {
        if options.is_some() {
            self.state().last_video_options = options;
        }
        self.toggle(TrackSource::Camera, TrackKind::Video, enabled).await
    }

    async fn set_microphone_enabled(
        &self,
        enabled: bool,
        options: Option<AudioCaptureOptions>,
    ) -> Result<Option<TrackPublication>, RoomError> {
        if options.is_some() {
            self.state().last_audio_options = options;
        }
        self.toggle(TrackSource::Microphone, TrackKind::Audio, enabled).await
    }

    async fn set_screen_share_enabled(
        &self,
        enabled: bool,
        options: Option<ScreenShareCaptureOptions>,
    ) -> Result<Option<TrackPublication>, RoomError> {
        if options.is_some() {
            self.state().last_screen_share_options = options;
        }
        self.toggle(TrackSource::ScreenShare, TrackKind::Video, enabled).await
    }
}

/// A remote participant's video publication, ready to wrap in a room event.
pub fn remote_video(
    identity: &str,
    track_sid: &str,
    source: TrackSource,
) -> (ParticipantRef, TrackPublication) {
    let handle = TrackHandle::new(track_sid, TrackKind::Video, source);
    (ParticipantRef::new(identity, None), TrackPublication::new(handle))
}

/// A remote participant's audio publication.
pub fn remote_audio(identity: &str, track_sid: &str) -> (ParticipantRef, TrackPublication) {
    let handle = TrackHandle::new(track_sid, TrackKind::Audio, TrackSource::Microphone);
    (ParticipantRef::new(identity, None), TrackPublication::new(handle))
}
