//! Video-call session core for LiveKit-backed calls.
//!
//! [`VideoCallService`] keeps the per-call bookkeeping (which video tracks
//! exist, who is pinned, how the grid is laid out) and drives camera,
//! microphone and screen-share publishing through a [`MediaRoom`].

pub mod config;
pub mod error;
pub mod events;
pub mod layout;
pub mod room;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod token;
pub mod track;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use config::Config;
pub use error::{CallError, CallFailure, CallResult, Operation};
pub use events::{CallEvent, EventBus, EventPayload, EventType};
pub use layout::{GridSize, LayoutMode};
pub use room::{MediaRoom, RoomError, RoomEvent, RoomEvents};
pub use service::{CallOptions, VideoCallService};
pub use state::VideoCallState;
pub use token::{provider_from_config, TokenError, TokenProvider, TokenRequest};
pub use track::{Dimensions, ParticipantRef, TrackHandle, TrackInfo, TrackKind, TrackSource};
