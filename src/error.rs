use crate::room::RoomError;
use crate::token::TokenError;

// ─── Operation ──────────────────────────────────────────────────────────────

/// The public service operation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    InitializeVideoCall,
    EnableCamera,
    DisableCamera,
    EnableMicrophone,
    DisableMicrophone,
    StartScreenShare,
    StopScreenShare,
    PinParticipant,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitializeVideoCall => "initialize video call",
            Self::EnableCamera => "enable camera",
            Self::DisableCamera => "disable camera",
            Self::EnableMicrophone => "enable microphone",
            Self::DisableMicrophone => "disable microphone",
            Self::StartScreenShare => "start screen sharing",
            Self::StopScreenShare => "stop screen sharing",
            Self::PinParticipant => "pin participant",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── CallFailure ────────────────────────────────────────────────────────────

/// Underlying cause of a failed operation.
#[derive(Debug, thiserror::Error)]
pub enum CallFailure {
    #[error("Not connected to a room")]
    NotConnected,

    #[error("Already connected to a call")]
    AlreadyActive,

    #[error("Failed to get local {0} track")]
    MissingTrack(&'static str),

    #[error("Participant '{0}' is not in the call")]
    UnknownParticipant(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Nested(Box<CallError>),
}

// ─── CallError ──────────────────────────────────────────────────────────────

/// Error returned by every fallible `VideoCallService` operation.
///
/// Displays as `Failed to <operation>: <cause>`, e.g.
/// `Failed to enable camera: Not connected to a room`.
#[derive(Debug, thiserror::Error)]
#[error("Failed to {operation}: {source}")]
pub struct CallError {
    pub operation: Operation,
    #[source]
    pub source: CallFailure,
}

impl CallError {
    pub fn new(operation: Operation, source: impl Into<CallFailure>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }

    /// Wrap an error from an inner operation under an outer one.
    pub fn nested(operation: Operation, inner: CallError) -> Self {
        Self {
            operation,
            source: CallFailure::Nested(Box::new(inner)),
        }
    }

    /// Stable machine-readable code of the root cause.
    pub fn code(&self) -> &'static str {
        match &self.source {
            CallFailure::NotConnected => "not_connected",
            CallFailure::AlreadyActive => "already_active",
            CallFailure::MissingTrack(_) => "track_missing",
            CallFailure::UnknownParticipant(_) => "participant_not_found",
            CallFailure::Token(_) => "token_failed",
            CallFailure::Room(RoomError::NotConnected) => "not_connected",
            CallFailure::Room(RoomError::PermissionDenied(_)) => "permission_denied",
            CallFailure::Room(RoomError::DeviceUnavailable(_)) => "device_unavailable",
            CallFailure::Room(RoomError::Connection { .. } | RoomError::AlreadyConnected) => {
                "connection_failed"
            }
            CallFailure::Room(RoomError::Other(_)) => "media_failed",
            CallFailure::Nested(inner) => inner.code(),
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_has_operation_prefix() {
        let err = CallError::new(Operation::EnableCamera, CallFailure::NotConnected);
        assert_eq!(err.to_string(), "Failed to enable camera: Not connected to a room");
        assert_eq!(err.code(), "not_connected");
    }

    #[test]
    fn room_errors_convert() {
        let err = CallError::new(
            Operation::StartScreenShare,
            RoomError::PermissionDenied("user dismissed picker".into()),
        );
        assert_eq!(
            err.to_string(),
            "Failed to start screen sharing: Permission denied: user dismissed picker"
        );
        assert_eq!(err.code(), "permission_denied");
    }

    #[test]
    fn nested_errors_keep_both_prefixes() {
        let inner = CallError::new(Operation::EnableMicrophone, CallFailure::MissingTrack("audio"));
        let outer = CallError::nested(Operation::InitializeVideoCall, inner);
        assert_eq!(
            outer.to_string(),
            "Failed to initialize video call: Failed to enable microphone: Failed to get local audio track"
        );
        assert_eq!(outer.code(), "track_missing");
    }
}
