use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Error;

mod opus_source;
mod rtp_capture;

pub use opus_source::{MicrophoneSource, OpusFramer};
pub use rtp_capture::{source_once, PacketReceiver, RtpSourceCapture, SourceFactory};

/// stream id shared by the camera and microphone tracks
pub const LOCAL_STREAM_ID: &str = "local-media";
/// stream id of the display-capture track
pub const SCREEN_STREAM_ID: &str = "local-screen";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    #[display(fmt = "audio")]
    Audio,
    #[display(fmt = "video")]
    Video,
}

/// What `request_user_media` should try to open. Mirrors the constraints
/// object handed to the platform capture API.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// the codecs this crate registers tracks with
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum MimeType {
    H264,
    Vp8,
    Vp9,
    Opus,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::H264 => MIME_TYPE_H264,
            MimeType::Vp8 => MIME_TYPE_VP8,
            MimeType::Vp9 => MIME_TYPE_VP9,
            MimeType::Opus => MIME_TYPE_OPUS,
        }
    }

    pub fn from_string(s: &str) -> Result<Self> {
        let mime_type = match s {
            MIME_TYPE_H264 => MimeType::H264,
            MIME_TYPE_VP8 => MimeType::Vp8,
            MIME_TYPE_VP9 => MimeType::Vp9,
            MIME_TYPE_OPUS => MimeType::Opus,
            _ => bail!("unsupported mime type: {}", s),
        };
        Ok(mime_type)
    }
}

pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MimeType::Opus.as_str().to_string(),
        clock_rate: 48000,
        channels: 2,
        ..Default::default()
    }
}

pub fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MimeType::Vp8.as_str().to_string(),
        clock_rate: 90000,
        ..Default::default()
    }
}

/// An outgoing track captured on this machine.
///
/// `enabled` is a mute flag: the capture worker keeps running and simply
/// drops payload while the flag is off, so flipping it never renegotiates
/// anything. `stop` is final - a stopped track cannot be restarted, the
/// owner has to request fresh media instead.
#[derive(Debug)]
pub struct CaptureTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    live: watch::Sender<bool>,
    rtc: Arc<TrackLocalStaticRTP>,
}

impl CaptureTrack {
    pub fn new(kind: TrackKind, id: &str, stream_id: &str, codec: RTCRtpCodecCapability) -> Self {
        let (live, _) = watch::channel(true);
        Self {
            kind,
            enabled: AtomicBool::new(true),
            live,
            rtc: Arc::new(TrackLocalStaticRTP::new(
                codec,
                id.to_string(),
                stream_id.to_string(),
            )),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.rtc.id()
    }

    /// the underlying webrtc track, for attaching to a peer connection
    pub fn rtc(&self) -> Arc<TrackLocalStaticRTP> {
        self.rtc.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// flips the mute flag and returns the new value
    pub fn toggle_enabled(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        *self.live.borrow()
    }

    /// ends the track. idempotent; wakes everything waiting on `ended`
    pub fn stop(&self) {
        if self.live.send_replace(false) {
            log::debug!("stopped {} track {}", self.kind, self.id());
        }
    }

    /// resolves once the track has ended, immediately if it already has
    pub async fn ended(&self) {
        let mut rx = self.live.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Camera/microphone media owned by the controller. Either track may be
/// absent (audio-only device, camera permission denied).
#[derive(Debug)]
pub struct LocalMedia {
    pub audio: Option<Arc<CaptureTrack>>,
    pub video: Option<Arc<CaptureTrack>>,
}

impl LocalMedia {
    pub fn tracks(&self) -> impl Iterator<Item = &Arc<CaptureTrack>> {
        self.audio.iter().chain(self.video.iter())
    }

    pub fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }

    pub fn is_live(&self) -> bool {
        self.tracks().any(|t| t.is_live())
    }
}

/// Display-capture media. Exists only while a share is running.
pub struct ScreenShareMedia {
    pub video: Arc<CaptureTrack>,
}

/// Tracks received from the peer. The peer connection owns them; this is a
/// reference bundle for the rendering side. Only the first remote stream is
/// bound.
#[derive(Clone)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub tracks: Vec<Arc<TrackRemote>>,
}

/// The platform capture collaborator. Implementations decide where media
/// actually comes from: `RtpSourceCapture` is fed RTP packets over channels,
/// tests plug in whatever they need.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// camera + microphone. Fails with `Error::MediaAccess` when nothing the
    /// constraints asked for is available.
    async fn request_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia, Error>;

    /// a display-capture video track for screen sharing
    async fn request_display_media(&self) -> Result<ScreenShareMedia, Error>;
}
