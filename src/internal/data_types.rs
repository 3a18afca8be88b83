use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use derive_more::Display;
use uuid::Uuid;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

use crate::media::{RemoteMedia, ScreenShareMedia, TrackKind};

pub const STATUS_MEDIA_READY: &str = "camera and microphone ready";
pub const STATUS_CALL_STARTED: &str = "call started";
pub const STATUS_CALL_ENDED: &str = "call ended";
pub const STATUS_SCREEN_SHARE_ACTIVE: &str = "screen share active";
pub const STATUS_SCREEN_SHARE_ENDED: &str = "screen share ended";
pub const STATUS_REMOTE_CONTROL: &str = "remote control is not available yet";
pub const STATUS_MEDIA_RELEASED: &str = "media released";

/// Where the controller currently is. Never stored - derived from which
/// resources exist, so it cannot drift out of sync with them.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum SessionState {
    #[display(fmt = "idle")]
    Idle,
    #[display(fmt = "media ready")]
    MediaReady,
    #[display(fmt = "in call")]
    InCall,
    #[display(fmt = "screen sharing")]
    ScreenSharing,
}

/// which stream the local preview sink is bound to
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Preview {
    #[display(fmt = "camera")]
    Camera,
    #[display(fmt = "screen")]
    Screen,
}

/// Button enablement and status text for a call UI. Derived on demand; the
/// controller never persists any of it.
#[derive(Clone, Debug)]
pub struct UiState {
    pub state: SessionState,
    pub can_start: bool,
    pub can_hang_up: bool,
    pub can_share_screen: bool,
    /// `None` when there is no local track of that kind
    pub video_enabled: Option<bool>,
    pub audio_enabled: Option<bool>,
    pub status: String,
}

/// The single active peer connection plus the senders created for the local
/// tracks. At most one exists at a time.
pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) connection: Arc<RTCPeerConnection>,
    pub(crate) senders: Vec<(TrackKind, Arc<RTCRtpSender>)>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.connection
    }

    pub fn sender(&self, kind: TrackKind) -> Option<&Arc<RTCRtpSender>> {
        self.senders
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, sender)| sender)
    }

    pub fn video_sender(&self) -> Option<&Arc<RTCRtpSender>> {
        self.sender(TrackKind::Video)
    }

    pub fn audio_sender(&self) -> Option<&Arc<RTCRtpSender>> {
        self.sender(TrackKind::Audio)
    }
}

/// State that outlives a single controller method call: peer-connection
/// callbacks and the screen-share end watcher hold a clone of this and must
/// see current values. Plain data behind short-lived std locks; a guard is
/// never held across an await.
pub(crate) struct Shared {
    status: RwLock<String>,
    preview: RwLock<Option<Preview>>,
    remote: RwLock<Option<RemoteMedia>>,
    screen: RwLock<Option<ScreenShareMedia>>,
    session_id: RwLock<Option<Uuid>>,
}

// a poisoned lock here only ever guards plain data; take it anyway
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(String::new()),
            preview: RwLock::new(None),
            remote: RwLock::new(None),
            screen: RwLock::new(None),
            session_id: RwLock::new(None),
        }
    }

    pub fn status(&self) -> String {
        read(&self.status).clone()
    }

    pub fn set_status(&self, text: &str) {
        log::info!("status: {}", text);
        *write(&self.status) = text.to_string();
    }

    pub fn preview(&self) -> Option<Preview> {
        *read(&self.preview)
    }

    pub fn set_preview(&self, preview: Option<Preview>) {
        *write(&self.preview) = preview;
    }

    pub fn remote(&self) -> Option<RemoteMedia> {
        read(&self.remote).clone()
    }

    pub fn take_remote(&self) -> Option<RemoteMedia> {
        write(&self.remote).take()
    }

    /// Binds a received track to the remote sink. The first stream to arrive
    /// wins; tracks from any other stream are ignored. Returns whether the
    /// track was bound.
    pub fn bind_remote_track(&self, stream_id: String, track: Arc<TrackRemote>) -> bool {
        let mut remote = write(&self.remote);
        match remote.as_mut() {
            Some(media) if media.stream_id == stream_id => {
                media.tracks.push(track);
                true
            }
            Some(media) => {
                log::info!(
                    "ignoring track from stream {}; already bound to {}",
                    stream_id,
                    media.stream_id
                );
                false
            }
            None => {
                *remote = Some(RemoteMedia {
                    stream_id,
                    tracks: vec![track],
                });
                true
            }
        }
    }

    pub fn screen_active(&self) -> bool {
        read(&self.screen).is_some()
    }

    pub fn set_screen(&self, screen: ScreenShareMedia) {
        *write(&self.screen) = Some(screen);
    }

    pub fn take_screen(&self) -> Option<ScreenShareMedia> {
        write(&self.screen).take()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        *read(&self.session_id)
    }

    pub fn set_session(&self, id: Uuid) {
        *write(&self.session_id) = Some(id);
    }

    pub fn clear_session(&self) {
        *write(&self.session_id) = None;
    }
}
