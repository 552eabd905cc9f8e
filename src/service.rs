//! Video-call session service.
//!
//! One `VideoCallService` drives one call: it asks the media room to publish
//! or unpublish local capture, folds room events into `VideoCallState`, and
//! reports every visible change on the `EventBus`.
//!
//! Locking:
//! - `state` is never held across a call into the media room;
//! - camera, microphone and screen share each have an operation lock held for
//!   a whole enable/disable/switch, so toggles of one kind run one at a time;
//! - `session` serialises initialisation against cleanup, and cleanup takes
//!   all three operation locks before stopping media.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{CallError, CallFailure, CallResult, Operation};
use crate::events::{CallEvent, EventBus};
use crate::layout::{GridSize, LayoutMode};
use crate::room::{
    AudioCaptureOptions, LocalParticipant, MediaRoom, RoomEvent, RoomEvents,
    ScreenShareCaptureOptions, VideoCaptureOptions,
};
use crate::state::VideoCallState;
use crate::token::{TokenProvider, TokenRequest};
use crate::track::{TrackHandle, TrackInfo, TrackKind, TrackSource};

// ─── CallOptions ────────────────────────────────────────────────────────────

/// Parameters for joining a call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub room_name: String,
    pub identity: String,
    pub name: Option<String>,
    pub matrix_access_token: Option<String>,
    pub enable_video: bool,
    pub enable_audio: bool,
    pub video_device_id: Option<String>,
    pub audio_device_id: Option<String>,
}

impl CallOptions {
    pub fn new(room_name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            identity: identity.into(),
            ..Self::default()
        }
    }
}

// ─── Service ────────────────────────────────────────────────────────────────

/// Handle on a call session. Clones share the same session.
#[derive(Clone)]
pub struct VideoCallService {
    inner: Arc<Inner>,
}

struct Inner {
    room: Arc<dyn MediaRoom>,
    tokens: Arc<dyn TokenProvider>,
    livekit_url: String,
    max_participants: usize,
    state: RwLock<VideoCallState>,
    bus: EventBus,
    session: Mutex<()>,
    camera_op: Mutex<()>,
    microphone_op: Mutex<()>,
    screen_share_op: Mutex<()>,
    listener: Mutex<Option<Listener>>,
}

struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type LayoutChange = Option<(LayoutMode, GridSize)>;

impl VideoCallService {
    pub fn new(room: Arc<dyn MediaRoom>, tokens: Arc<dyn TokenProvider>, cfg: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                room,
                tokens,
                livekit_url: cfg.livekit_url.clone(),
                max_participants: cfg.max_participants,
                state: RwLock::new(VideoCallState::default()),
                bus: EventBus::new(),
                session: Mutex::new(()),
                camera_op: Mutex::new(()),
                microphone_op: Mutex::new(()),
                screen_share_op: Mutex::new(()),
                listener: Mutex::new(None),
            }),
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Join the call room and publish the requested media.
    ///
    /// A token or connection failure leaves the service untouched. If the
    /// initial camera or microphone cannot be enabled the session is torn
    /// down again before the error is returned.
    #[instrument(skip(self, options), fields(room = %options.room_name, identity = %options.identity))]
    pub async fn initialize_video_call(&self, options: CallOptions) -> CallResult<()> {
        let op = Operation::InitializeVideoCall;
        let _session = self.inner.session.lock().await;

        if self.inner.state.read().await.is_video_call {
            return Err(CallError::new(op, CallFailure::AlreadyActive));
        }

        let request = TokenRequest {
            room_name: options.room_name.clone(),
            identity: options.identity.clone(),
            name: options.name.clone(),
            matrix_access_token: options.matrix_access_token.clone(),
        };
        let token = self
            .inner
            .tokens
            .request_token(&request)
            .await
            .map_err(|e| CallError::new(op, e))?;

        let events = self
            .inner
            .room
            .connect(&self.inner.livekit_url, &options.room_name, &token)
            .await
            .map_err(|e| CallError::new(op, e))?;

        if self.inner.room.local_participant().is_none() {
            if let Err(e) = self.inner.room.disconnect().await {
                warn!(error = %e, "disconnect after failed join did not complete");
            }
            return Err(CallError::new(op, CallFailure::NotConnected));
        }

        self.inner.state.write().await.is_video_call = true;
        self.start_listener(events).await;
        info!("video call session started");

        if options.enable_video {
            if let Err(e) = self.enable_camera(options.video_device_id.clone()).await {
                warn!(error = %e, "initial camera failed, rolling back session");
                self.teardown().await;
                return Err(CallError::nested(op, e));
            }
        }
        if options.enable_audio {
            if let Err(e) = self.enable_microphone(options.audio_device_id.clone()).await {
                warn!(error = %e, "initial microphone failed, rolling back session");
                self.teardown().await;
                return Err(CallError::nested(op, e));
            }
        }

        Ok(())
    }

    /// Tear the session down. Never fails: media that cannot be stopped is
    /// logged and the state is reset regardless.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) {
        let _session = self.inner.session.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        // Fixed order: camera, microphone, screen share. An enable already in
        // flight finishes first and is then stopped below.
        let _camera = self.inner.camera_op.lock().await;
        let _microphone = self.inner.microphone_op.lock().await;
        let _screen_share = self.inner.screen_share_op.lock().await;

        let (video, audio, screen) = {
            let state = self.inner.state.read().await;
            (
                state.local_video_track.is_some(),
                state.local_audio_track.is_some(),
                state.screen_share_track.is_some(),
            )
        };

        if video {
            if let Err(e) = self.disable_camera_locked().await {
                warn!(error = %e, "cleanup: camera teardown failed");
            }
        }
        if audio {
            if let Err(e) = self.disable_microphone_locked().await {
                warn!(error = %e, "cleanup: microphone teardown failed");
            }
        }
        if screen {
            if let Err(e) = self.stop_screen_share_locked().await {
                warn!(error = %e, "cleanup: screen share teardown failed");
            }
        }

        self.stop_listener().await;
        *self.inner.state.write().await = VideoCallState::default();

        if let Err(e) = self.inner.room.disconnect().await {
            warn!(error = %e, "cleanup: disconnect failed");
        }
        info!("video call session cleaned up");
    }

    async fn start_listener(&self, mut events: RoomEvents) {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("room event stream closed");
                            break;
                        };
                        let Some(inner) = weak.upgrade() else { break };
                        inner.handle_room_event(event).await;
                    }
                }
            }
        });

        let previous = self.inner.listener.lock().await.replace(Listener { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    async fn stop_listener(&self) {
        let listener = self.inner.listener.lock().await.take();
        if let Some(listener) = listener {
            listener.cancel.cancel();
            if let Err(e) = listener.task.await {
                warn!(error = %e, "room event listener ended abnormally");
            }
        }
    }

    fn local_participant(&self, op: Operation) -> CallResult<LocalParticipant> {
        self.inner
            .room
            .local_participant()
            .ok_or_else(|| CallError::new(op, CallFailure::NotConnected))
    }

    /// Unpublish a track whose publish completed after the session ended.
    async fn discard_publication(&self, op: Operation, source: TrackSource) -> CallError {
        warn!(?source, "session ended while publishing, unpublishing");
        let undo = match source {
            TrackSource::Camera => self.inner.room.set_camera_enabled(false, None).await,
            TrackSource::Microphone => self.inner.room.set_microphone_enabled(false, None).await,
            _ => self.inner.room.set_screen_share_enabled(false, None).await,
        };
        if let Err(e) = undo {
            warn!(error = %e, "unpublish after session end failed");
        }
        CallError::new(op, CallFailure::NotConnected)
    }

    // ── Camera ──────────────────────────────────────────────────────────

    /// Publish the camera (720p30) from `device_id` or the default device.
    /// Returns the already published track when the camera is on.
    pub async fn enable_camera(&self, device_id: Option<String>) -> CallResult<TrackHandle> {
        let _op = self.inner.camera_op.lock().await;
        self.enable_camera_locked(device_id).await
    }

    pub async fn disable_camera(&self) -> CallResult<()> {
        let _op = self.inner.camera_op.lock().await;
        self.disable_camera_locked().await
    }

    /// Re-open the camera on another device. No-op while the camera is off.
    pub async fn switch_camera(&self, device_id: &str) -> CallResult<()> {
        let _op = self.inner.camera_op.lock().await;
        if self.inner.state.read().await.local_video_track.is_none() {
            return Ok(());
        }
        self.disable_camera_locked().await?;
        self.enable_camera_locked(Some(device_id.to_string())).await?;
        Ok(())
    }

    async fn enable_camera_locked(&self, device_id: Option<String>) -> CallResult<TrackHandle> {
        let op = Operation::EnableCamera;
        let local = self.local_participant(op)?;

        if let Some(existing) = self.inner.state.read().await.local_video_track.clone() {
            return Ok(existing);
        }

        let publication = self
            .inner
            .room
            .set_camera_enabled(true, Some(VideoCaptureOptions::hd(device_id)))
            .await
            .map_err(|e| CallError::new(op, e))?
            .ok_or_else(|| CallError::new(op, CallFailure::MissingTrack("video")))?;

        let mut info = TrackInfo::from_publication(local.to_participant_ref(), &publication, true);
        info.is_screen_share = false;
        let handle = publication.track.clone();

        let committed = {
            let mut state = self.inner.state.write().await;
            if state.is_video_call {
                state.local_video_track = Some(handle.clone());
                state.insert_track(info.clone());
            }
            state.is_video_call
        };
        if !committed {
            return Err(self.discard_publication(op, TrackSource::Camera).await);
        }

        info!(track_sid = %info.track_sid, "camera published");
        self.inner.bus.emit(CallEvent::track_subscribed(info));
        Ok(handle)
    }

    async fn disable_camera_locked(&self) -> CallResult<()> {
        let op = Operation::DisableCamera;
        let local = self.local_participant(op)?;

        self.inner
            .room
            .set_camera_enabled(false, None)
            .await
            .map_err(|e| CallError::new(op, e))?;

        let (removed, layout) = {
            let mut state = self.inner.state.write().await;
            match state.local_video_track.take() {
                Some(handle) => {
                    let removed = state.remove_track_by_handle(&local.identity, &handle);
                    let layout = state.prune_pin().map(|mode| (mode, state.grid_size));
                    (removed, layout)
                }
                None => (None, None),
            }
        };

        if let Some(track) = removed {
            info!(track_sid = %track.track_sid, "camera unpublished");
            self.inner
                .bus
                .emit(CallEvent::track_unsubscribed(track.identity(), &track.track_sid));
        }
        self.inner.emit_layout(layout);
        Ok(())
    }

    // ── Microphone ──────────────────────────────────────────────────────

    /// Publish the microphone with echo cancellation, noise suppression and
    /// auto gain. Audio is not rendered, so it never enters the track map.
    pub async fn enable_microphone(&self, device_id: Option<String>) -> CallResult<TrackHandle> {
        let _op = self.inner.microphone_op.lock().await;
        self.enable_microphone_locked(device_id).await
    }

    pub async fn disable_microphone(&self) -> CallResult<()> {
        let _op = self.inner.microphone_op.lock().await;
        self.disable_microphone_locked().await
    }

    pub async fn switch_microphone(&self, device_id: &str) -> CallResult<()> {
        let _op = self.inner.microphone_op.lock().await;
        if self.inner.state.read().await.local_audio_track.is_none() {
            return Ok(());
        }
        self.disable_microphone_locked().await?;
        self.enable_microphone_locked(Some(device_id.to_string())).await?;
        Ok(())
    }

    async fn enable_microphone_locked(&self, device_id: Option<String>) -> CallResult<TrackHandle> {
        let op = Operation::EnableMicrophone;
        self.local_participant(op)?;

        if let Some(existing) = self.inner.state.read().await.local_audio_track.clone() {
            return Ok(existing);
        }

        let publication = self
            .inner
            .room
            .set_microphone_enabled(true, Some(AudioCaptureOptions::voice(device_id)))
            .await
            .map_err(|e| CallError::new(op, e))?
            .ok_or_else(|| CallError::new(op, CallFailure::MissingTrack("audio")))?;

        let handle = publication.track;
        let committed = {
            let mut state = self.inner.state.write().await;
            if state.is_video_call {
                state.local_audio_track = Some(handle.clone());
            }
            state.is_video_call
        };
        if !committed {
            return Err(self.discard_publication(op, TrackSource::Microphone).await);
        }
        info!(track_sid = %handle.sid(), "microphone published");
        Ok(handle)
    }

    async fn disable_microphone_locked(&self) -> CallResult<()> {
        let op = Operation::DisableMicrophone;
        self.local_participant(op)?;

        self.inner
            .room
            .set_microphone_enabled(false, None)
            .await
            .map_err(|e| CallError::new(op, e))?;

        if let Some(handle) = self.inner.state.write().await.local_audio_track.take() {
            info!(track_sid = %handle.sid(), "microphone unpublished");
        }
        Ok(())
    }

    // ── Screen share ────────────────────────────────────────────────────

    /// Share the screen (with system audio) and switch to speaker view.
    /// Calling it while already sharing returns the current track and
    /// still switches to speaker view.
    pub async fn start_screen_share(&self) -> CallResult<TrackHandle> {
        let op = Operation::StartScreenShare;
        let _op = self.inner.screen_share_op.lock().await;
        let local = self.local_participant(op)?;

        let existing = {
            let mut state = self.inner.state.write().await;
            match state.screen_share_track.clone() {
                Some(handle) => {
                    state.set_layout_mode(LayoutMode::Speaker);
                    Some((handle, state.grid_size))
                }
                None => None,
            }
        };
        if let Some((handle, grid)) = existing {
            self.inner.emit_layout(Some((LayoutMode::Speaker, grid)));
            return Ok(handle);
        }

        let publication = self
            .inner
            .room
            .set_screen_share_enabled(true, Some(ScreenShareCaptureOptions { audio: true }))
            .await
            .map_err(|e| CallError::new(op, e))?
            .ok_or_else(|| CallError::new(op, CallFailure::MissingTrack("screen share")))?;

        let mut info = TrackInfo::from_publication(local.to_participant_ref(), &publication, true);
        info.is_screen_share = true;
        let handle = publication.track.clone();

        let grid = {
            let mut state = self.inner.state.write().await;
            if state.is_video_call {
                state.screen_share_track = Some(handle.clone());
                state.insert_track(info.clone());
                state.set_layout_mode(LayoutMode::Speaker);
                Some(state.grid_size)
            } else {
                None
            }
        };
        let Some(grid) = grid else {
            return Err(self.discard_publication(op, TrackSource::ScreenShare).await);
        };

        info!(track_sid = %info.track_sid, "screen share started");
        self.inner.bus.emit(CallEvent::track_subscribed(info));
        self.inner.emit_layout(Some((LayoutMode::Speaker, grid)));
        Ok(handle)
    }

    /// Stop sharing and return to the grid, whatever layout was active.
    pub async fn stop_screen_share(&self) -> CallResult<()> {
        let _op = self.inner.screen_share_op.lock().await;
        self.stop_screen_share_locked().await
    }

    async fn stop_screen_share_locked(&self) -> CallResult<()> {
        let op = Operation::StopScreenShare;
        let local = self.local_participant(op)?;

        self.inner
            .room
            .set_screen_share_enabled(false, None)
            .await
            .map_err(|e| CallError::new(op, e))?;

        let (removed, grid) = {
            let mut state = self.inner.state.write().await;
            let removed = match state.screen_share_track.take() {
                Some(handle) => state.remove_track_by_handle(&local.identity, &handle),
                None => None,
            };
            state.prune_pin();
            state.set_layout_mode(LayoutMode::Grid);
            (removed, state.grid_size)
        };

        if let Some(track) = removed {
            info!(track_sid = %track.track_sid, "screen share stopped");
            self.inner
                .bus
                .emit(CallEvent::track_unsubscribed(track.identity(), &track.track_sid));
        }
        self.inner.emit_layout(Some((LayoutMode::Grid, grid)));
        Ok(())
    }

    // ── Layout ──────────────────────────────────────────────────────────

    /// Pin a participant (speaker view) or clear the pin with `None`.
    pub async fn pin_participant(&self, identity: Option<&str>) -> CallResult<()> {
        let layout = {
            let mut state = self.inner.state.write().await;
            if let Some(identity) = identity {
                if !state.has_participant(identity) {
                    return Err(CallError::new(
                        Operation::PinParticipant,
                        CallFailure::UnknownParticipant(identity.to_string()),
                    ));
                }
            }
            state
                .pin(identity.map(str::to_string))
                .map(|mode| (mode, state.grid_size))
        };
        self.inner.emit_layout(layout);
        Ok(())
    }

    pub async fn set_layout_mode(&self, mode: LayoutMode) {
        let grid = {
            let mut state = self.inner.state.write().await;
            state.set_layout_mode(mode);
            state.grid_size
        };
        self.inner.emit_layout(Some((mode, grid)));
    }

    // ── Read-only views ─────────────────────────────────────────────────

    /// Snapshot of the current state.
    pub async fn state(&self) -> VideoCallState {
        self.inner.state.read().await.clone()
    }

    pub async fn all_video_tracks(&self) -> Vec<TrackInfo> {
        self.inner.state.read().await.all_tracks()
    }

    pub async fn participant_video_tracks(&self, identity: &str) -> Vec<TrackInfo> {
        self.inner.state.read().await.tracks_for(identity)
    }

    pub async fn is_video_call(&self) -> bool {
        self.inner.state.read().await.is_video_call
    }

    /// Participants with at least one rendered video track.
    pub async fn participant_count(&self) -> usize {
        self.inner.state.read().await.participants.len()
    }

    pub async fn is_at_max_capacity(&self) -> bool {
        self.participant_count().await >= self.inner.max_participants
    }

    /// New receiver for call events.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.bus.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }
}

// ─── Room events ────────────────────────────────────────────────────────────

impl Inner {
    fn emit_layout(&self, change: LayoutChange) {
        if let Some((mode, grid)) = change {
            self.bus.emit(CallEvent::layout_changed(mode, grid));
        }
    }

    async fn handle_room_event(&self, event: RoomEvent) {
        debug!(event = event.name(), "room event");
        match event {
            RoomEvent::TrackSubscribed {
                participant,
                publication,
            } => {
                if publication.kind() != TrackKind::Video {
                    return;
                }
                let info = TrackInfo::from_publication(participant, &publication, false);
                self.state.write().await.insert_track(info.clone());
                self.bus.emit(CallEvent::track_subscribed(info));
            }

            RoomEvent::TrackUnsubscribed {
                participant,
                publication,
            } => {
                if publication.kind() != TrackKind::Video {
                    return;
                }
                let (removed, layout) = {
                    let mut state = self.state.write().await;
                    let removed =
                        state.remove_track_by_sid(&participant.identity, &publication.track_sid);
                    let layout = state.prune_pin().map(|mode| (mode, state.grid_size));
                    (removed, layout)
                };
                if let Some(track) = removed {
                    self.bus
                        .emit(CallEvent::track_unsubscribed(track.identity(), &track.track_sid));
                }
                self.emit_layout(layout);
            }

            RoomEvent::ParticipantDisconnected { identity } => {
                let (removed, layout) = {
                    let mut state = self.state.write().await;
                    let removed = state.remove_participant(&identity);
                    let layout = state.prune_pin().map(|mode| (mode, state.grid_size));
                    (removed, layout)
                };
                info!(participant = %identity, tracks = removed.len(), "participant disconnected");
                let sids = removed.into_iter().map(|t| t.track_sid).collect();
                self.bus.emit(CallEvent::participant_left(&identity, sids));
                self.emit_layout(layout);
            }

            RoomEvent::TrackDimensionsChanged {
                identity,
                track_sid,
                dimensions,
            } => {
                let updated = self
                    .state
                    .write()
                    .await
                    .set_dimensions(&identity, &track_sid, dimensions);
                if updated {
                    self.bus
                        .emit(CallEvent::dimensions_changed(&identity, &track_sid, dimensions));
                }
            }

            RoomEvent::TrackMuted {
                participant,
                publication,
            } => self.video_toggled(&participant.identity, &publication.track_sid, publication.kind(), false),

            RoomEvent::TrackUnmuted {
                participant,
                publication,
            } => self.video_toggled(&participant.identity, &publication.track_sid, publication.kind(), true),
        }
    }

    fn video_toggled(&self, identity: &str, track_sid: &str, kind: TrackKind, enabled: bool) {
        if kind == TrackKind::Video {
            self.bus
                .emit(CallEvent::participant_video_enabled(identity, track_sid, enabled));
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
