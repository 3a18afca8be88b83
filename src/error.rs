use thiserror::Error;

use crate::internal::data_types::SessionState;

/// Everything that can go wrong at the controller boundary. All of these are
/// recoverable: the session stays (or rolls back to) a consistent state and
/// the failure is mirrored into the status text for the UI.
#[derive(Debug, Error)]
pub enum Error {
    /// camera/microphone access was denied or no device was available
    #[error("media access failed: {reason}")]
    MediaAccess { reason: String },
    /// display capture was denied or no display source was available
    #[error("screen share failed: {reason}")]
    ScreenShare { reason: String },
    /// an action was triggered outside its precondition state
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
    /// placeholder actions surface this instead of pretending to work
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    /// the emitted-events receiver was dropped; nobody is listening for signals
    #[error("event channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Rtc(#[from] webrtc::Error),
}

impl Error {
    /// the human-readable part, without the error-kind prefix. used when one
    /// error kind is folded into another (a capture failure reported as a
    /// screen-share failure keeps only the underlying reason).
    pub(crate) fn reason(&self) -> String {
        match self {
            Error::MediaAccess { reason } | Error::ScreenShare { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}
