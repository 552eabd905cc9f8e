use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::layout::{GridSize, LayoutMode};
use crate::track::{Dimensions, TrackHandle, TrackInfo};

// ---------------------------------------------------------------------------
// VideoCallState
// ---------------------------------------------------------------------------

/// In-memory state of one call session.
///
/// Mutations go through the methods below, which keep three rules intact:
/// no participant maps to an empty track list, `grid_size` always matches
/// the current track count, and a pin never outlives its participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoCallState {
    pub is_video_call: bool,
    pub participants: HashMap<String, Vec<TrackInfo>>,
    pub local_video_track: Option<TrackHandle>,
    pub local_audio_track: Option<TrackHandle>,
    pub screen_share_track: Option<TrackHandle>,
    pub pinned_participant: Option<String>,
    pub layout_mode: LayoutMode,
    pub grid_size: GridSize,
}

impl Default for VideoCallState {
    fn default() -> Self {
        Self {
            is_video_call: false,
            participants: HashMap::new(),
            local_video_track: None,
            local_audio_track: None,
            screen_share_track: None,
            pinned_participant: None,
            layout_mode: LayoutMode::Grid,
            grid_size: GridSize::default(),
        }
    }
}

impl VideoCallState {
    // ── Read-only projections ───────────────────────────────────────────

    pub fn total_tracks(&self) -> usize {
        self.participants.values().map(Vec::len).sum()
    }

    pub fn all_tracks(&self) -> Vec<TrackInfo> {
        self.participants.values().flatten().cloned().collect()
    }

    /// Tracks of one participant; empty when the identity is unknown.
    pub fn tracks_for(&self, identity: &str) -> Vec<TrackInfo> {
        self.participants.get(identity).cloned().unwrap_or_default()
    }

    pub fn has_participant(&self, identity: &str) -> bool {
        self.participants.contains_key(identity)
    }

    // ── Track bookkeeping ───────────────────────────────────────────────

    /// Add a track under its owner. A track whose sid is already listed for
    /// that participant replaces the old entry in place.
    pub(crate) fn insert_track(&mut self, info: TrackInfo) {
        let tracks = self
            .participants
            .entry(info.participant.identity.clone())
            .or_default();
        match tracks.iter_mut().find(|t| t.track_sid == info.track_sid) {
            Some(existing) => *existing = info,
            None => tracks.push(info),
        }
        self.recompute_grid();
    }

    pub(crate) fn remove_track_by_sid(&mut self, identity: &str, track_sid: &str) -> Option<TrackInfo> {
        self.remove_track_where(identity, |t| t.track_sid == track_sid)
    }

    pub(crate) fn remove_track_by_handle(
        &mut self,
        identity: &str,
        handle: &TrackHandle,
    ) -> Option<TrackInfo> {
        self.remove_track_where(identity, |t| &t.track == handle)
    }

    fn remove_track_where<F>(&mut self, identity: &str, matches: F) -> Option<TrackInfo>
    where
        F: Fn(&TrackInfo) -> bool,
    {
        let tracks = self.participants.get_mut(identity)?;
        let index = tracks.iter().position(matches)?;
        let removed = tracks.remove(index);
        if tracks.is_empty() {
            self.participants.remove(identity);
        }
        self.recompute_grid();
        Some(removed)
    }

    /// Drop every track of a participant, returning what was removed.
    pub(crate) fn remove_participant(&mut self, identity: &str) -> Vec<TrackInfo> {
        let removed = self.participants.remove(identity).unwrap_or_default();
        self.recompute_grid();
        removed
    }

    /// Record new dimensions for a track. Returns `false` when the track is
    /// not known.
    pub(crate) fn set_dimensions(
        &mut self,
        identity: &str,
        track_sid: &str,
        dimensions: Dimensions,
    ) -> bool {
        let Some(track) = self
            .participants
            .get_mut(identity)
            .and_then(|tracks| tracks.iter_mut().find(|t| t.track_sid == track_sid))
        else {
            return false;
        };
        track.dimensions = Some(dimensions);
        true
    }

    // ── Layout & pinning ────────────────────────────────────────────────

    pub(crate) fn set_layout_mode(&mut self, mode: LayoutMode) {
        self.layout_mode = mode;
        self.recompute_grid();
    }

    /// Apply a pin change. Returns the layout that was set as a consequence,
    /// if any: pinning outside fullscreen selects speaker view, unpinning
    /// while in speaker view returns to the grid.
    pub(crate) fn pin(&mut self, identity: Option<String>) -> Option<LayoutMode> {
        let pinning = identity.is_some();
        self.pinned_participant = identity;

        if pinning && self.layout_mode != LayoutMode::Fullscreen {
            self.set_layout_mode(LayoutMode::Speaker);
            Some(LayoutMode::Speaker)
        } else if !pinning && self.layout_mode == LayoutMode::Speaker {
            self.set_layout_mode(LayoutMode::Grid);
            Some(LayoutMode::Grid)
        } else {
            None
        }
    }

    /// Clear the pin if its participant is gone from the map.
    pub(crate) fn prune_pin(&mut self) -> Option<LayoutMode> {
        match &self.pinned_participant {
            Some(pinned) if !self.participants.contains_key(pinned) => {
                debug!(participant = %pinned, "pinned participant left, unpinning");
                self.pin(None)
            }
            _ => None,
        }
    }

    fn recompute_grid(&mut self) {
        let grid = GridSize::for_tracks(self.total_tracks());
        if grid != self.grid_size {
            debug!(rows = grid.rows, cols = grid.cols, "grid resized");
        }
        self.grid_size = grid;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{ParticipantRef, TrackKind, TrackPublication, TrackSource};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn video(identity: &str, sid: &str) -> TrackInfo {
        let publication =
            TrackPublication::new(TrackHandle::new(sid, TrackKind::Video, TrackSource::Camera));
        TrackInfo::from_publication(ParticipantRef::new(identity, None), &publication, false)
    }

    fn assert_no_empty_lists(state: &VideoCallState) {
        assert!(state.participants.values().all(|tracks| !tracks.is_empty()));
    }

    #[test]
    fn insert_and_remove_keep_map_clean() {
        let mut state = VideoCallState::default();
        state.insert_track(video("@alice", "TR_1"));
        state.insert_track(video("@alice", "TR_2"));
        state.insert_track(video("@bob", "TR_3"));
        assert_eq!(state.total_tracks(), 3);
        assert_eq!(state.grid_size, GridSize { rows: 2, cols: 2 });

        assert!(state.remove_track_by_sid("@bob", "TR_3").is_some());
        assert!(!state.has_participant("@bob"));
        assert_no_empty_lists(&state);

        assert!(state.remove_track_by_sid("@alice", "TR_missing").is_none());
        assert!(state.remove_track_by_sid("@alice", "TR_1").is_some());
        assert!(state.remove_track_by_sid("@alice", "TR_2").is_some());
        assert!(state.participants.is_empty());
        assert_eq!(state.grid_size, GridSize { rows: 1, cols: 1 });
    }

    #[test]
    fn duplicate_sid_replaces_entry() {
        let mut state = VideoCallState::default();
        state.insert_track(video("@alice", "TR_1"));
        let mut again = video("@alice", "TR_1");
        again.dimensions = Some(Dimensions { width: 640, height: 360 });
        state.insert_track(again);

        let tracks = state.tracks_for("@alice");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].dimensions, Some(Dimensions { width: 640, height: 360 }));
    }

    #[test]
    fn remove_by_handle_matches_identity_not_sid() {
        let mut state = VideoCallState::default();
        let info = video("@me", "TR_cam");
        let handle = info.track.clone();
        state.insert_track(info);

        let stranger = TrackHandle::new("TR_cam", TrackKind::Video, TrackSource::Camera);
        assert!(state.remove_track_by_handle("@me", &stranger).is_none());
        assert!(state.remove_track_by_handle("@me", &handle).is_some());
        assert!(state.participants.is_empty());
    }

    #[test]
    fn pin_rules() {
        let mut state = VideoCallState::default();
        state.insert_track(video("@bob", "TR_1"));

        assert_eq!(state.pin(Some("@bob".into())), Some(LayoutMode::Speaker));
        assert_eq!(state.layout_mode, LayoutMode::Speaker);

        assert_eq!(state.pin(None), Some(LayoutMode::Grid));
        assert_eq!(state.layout_mode, LayoutMode::Grid);

        // Fullscreen is never disturbed.
        state.set_layout_mode(LayoutMode::Fullscreen);
        assert_eq!(state.pin(Some("@bob".into())), None);
        assert_eq!(state.pin(None), None);
        assert_eq!(state.layout_mode, LayoutMode::Fullscreen);
    }

    #[test]
    fn pin_is_pruned_when_participant_leaves() {
        let mut state = VideoCallState::default();
        state.insert_track(video("@bob", "TR_1"));
        state.insert_track(video("@carol", "TR_2"));
        state.pin(Some("@bob".into()));

        let removed = state.remove_participant("@bob");
        assert_eq!(removed.len(), 1);
        assert_eq!(state.prune_pin(), Some(LayoutMode::Grid));
        assert_eq!(state.pinned_participant, None);
        assert_eq!(state.layout_mode, LayoutMode::Grid);
        assert_eq!(state.grid_size, GridSize { rows: 1, cols: 1 });
    }

    #[test]
    fn prune_keeps_present_pin() {
        let mut state = VideoCallState::default();
        state.insert_track(video("@bob", "TR_1"));
        state.pin(Some("@bob".into()));
        assert_eq!(state.prune_pin(), None);
        assert_eq!(state.pinned_participant.as_deref(), Some("@bob"));
    }

    #[test]
    fn dimensions_update_only_known_tracks() {
        let mut state = VideoCallState::default();
        state.insert_track(video("@bob", "TR_1"));
        let dims = Dimensions { width: 1920, height: 1080 };
        assert!(state.set_dimensions("@bob", "TR_1", dims));
        assert!(!state.set_dimensions("@bob", "TR_2", dims));
        assert!(!state.set_dimensions("@nobody", "TR_1", dims));
        assert_eq!(state.tracks_for("@bob")[0].dimensions, Some(dims));
    }

    #[test]
    fn random_sequences_never_leave_empty_lists() {
        // Seeded walk over subscribe/unsubscribe events.
        let identities = ["@a", "@b", "@c"];
        let mut state = VideoCallState::default();
        let mut rng = StdRng::seed_from_u64(0x2545_f491);
        for step in 0..2000 {
            let identity = identities[rng.gen_range(0..identities.len())];
            let sid = format!("TR_{}", rng.gen_range(0..5));
            if rng.gen_bool(0.5) {
                state.insert_track(video(identity, &sid));
            } else {
                state.remove_track_by_sid(identity, &sid);
            }
            assert_no_empty_lists(&state);
            assert_eq!(
                state.grid_size,
                GridSize::for_tracks(state.total_tracks()),
                "grid out of sync at step {step}"
            );
        }
    }
}
