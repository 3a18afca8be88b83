use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::rtp;
use webrtc::track::track_local::TrackLocalWriter;

use crate::error::Error;
use crate::media::{
    opus_capability, vp8_capability, CaptureTrack, LocalMedia, MediaCapture, MediaConstraints,
    ScreenShareMedia, TrackKind, LOCAL_STREAM_ID, SCREEN_STREAM_ID,
};

/// RTP packets produced by a capture device
pub type PacketReceiver = mpsc::UnboundedReceiver<rtp::packet::Packet>;

/// Opens a capture device on demand. Returning `None` is the analog of a
/// denied permission or a missing device.
pub type SourceFactory = Box<dyn Fn() -> Option<PacketReceiver> + Send + Sync>;

/// wraps an already-open receiver as a factory that hands it out once
pub fn source_once(rx: PacketReceiver) -> SourceFactory {
    let slot = Mutex::new(Some(rx));
    Box::new(move || slot.lock().ok().and_then(|mut rx| rx.take()))
}

/// Capture collaborator fed by RTP packet channels.
///
/// Turning audio/video into RTP packets is the producer's responsibility
/// (`MicrophoneSource` does it for the default input device); this type only
/// binds each packet stream to an outgoing track and enforces the mute flag.
/// A producer dropping its sender ends the track, which is how an externally
/// stopped screen share reaches the controller.
#[derive(Default)]
pub struct RtpSourceCapture {
    camera: Option<SourceFactory>,
    microphone: Option<SourceFactory>,
    screen: Option<SourceFactory>,
}

impl RtpSourceCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, factory: SourceFactory) -> Self {
        self.camera = Some(factory);
        self
    }

    pub fn with_microphone(mut self, factory: SourceFactory) -> Self {
        self.microphone = Some(factory);
        self
    }

    pub fn with_screen(mut self, factory: SourceFactory) -> Self {
        self.screen = Some(factory);
        self
    }

    fn open(
        factory: &Option<SourceFactory>,
        kind: TrackKind,
        id: &str,
        stream_id: &str,
    ) -> Option<Arc<CaptureTrack>> {
        let rx = factory.as_ref().and_then(|f| f())?;
        let codec = match kind {
            TrackKind::Audio => opus_capability(),
            TrackKind::Video => vp8_capability(),
        };
        let track = Arc::new(CaptureTrack::new(kind, id, stream_id, codec));
        tokio::spawn(forward(rx, track.clone()));
        Some(track)
    }
}

#[async_trait]
impl MediaCapture for RtpSourceCapture {
    async fn request_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia, Error> {
        let audio = constraints
            .audio
            .then(|| Self::open(&self.microphone, TrackKind::Audio, "microphone", LOCAL_STREAM_ID))
            .flatten();
        let video = constraints
            .video
            .then(|| Self::open(&self.camera, TrackKind::Video, "camera", LOCAL_STREAM_ID))
            .flatten();

        if audio.is_none() && video.is_none() {
            return Err(Error::MediaAccess {
                reason: "no capture source available".into(),
            });
        }
        Ok(LocalMedia { audio, video })
    }

    async fn request_display_media(&self) -> Result<ScreenShareMedia, Error> {
        let video = Self::open(&self.screen, TrackKind::Video, "screen", SCREEN_STREAM_ID).ok_or(
            Error::MediaAccess {
                reason: "no display source available".into(),
            },
        )?;
        Ok(ScreenShareMedia { video })
    }
}

/// Moves packets from a capture device into the outgoing track until either
/// side goes away. Muted packets are dropped here, not at the device.
async fn forward(mut rx: PacketReceiver, track: Arc<CaptureTrack>) {
    let rtc = track.rtc();
    loop {
        tokio::select! {
            _ = track.ended() => break,
            packet = rx.recv() => match packet {
                Some(packet) => {
                    if !track.is_enabled() {
                        continue;
                    }
                    if let Err(e) = rtc.write_rtp(&packet).await {
                        log::warn!("failed to write RTP to {} track: {}", track.kind(), e);
                    }
                }
                None => {
                    // the producer hung up on us - the platform's way of
                    // saying the user stopped this capture
                    track.stop();
                    break;
                }
            }
        }
    }
    log::debug!("capture worker for {} track {} exiting", track.kind(), track.id());
}
