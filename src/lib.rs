use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

mod config;
mod error;
mod internal;
pub mod media;

pub use config::{IceServer, RtcConfig};
pub use error::Error;
pub use internal::data_types::{
    Preview, Session, SessionState, UiState, STATUS_CALL_ENDED, STATUS_CALL_STARTED,
    STATUS_MEDIA_READY, STATUS_MEDIA_RELEASED, STATUS_REMOTE_CONTROL,
    STATUS_SCREEN_SHARE_ACTIVE, STATUS_SCREEN_SHARE_ENDED,
};
pub use internal::events::EmittedEvents;
pub use media::{
    CaptureTrack, LocalMedia, MediaCapture, MediaConstraints, RemoteMedia, ScreenShareMedia,
    TrackKind,
};

use internal::data_types::Shared;

#[cfg(feature = "test-server")]
pub mod testing;
#[cfg(feature = "test-server")]
pub use testing::signaling_server;

#[cfg(feature = "test-server")]
#[macro_use]
extern crate lazy_static;

/// simple-call
/// A controller for one peer-to-peer call session on top of
/// [webrtc-rs](https://github.com/webrtc-rs/webrtc).
///
/// The controller owns the local capture tracks and the single peer
/// connection, and exposes the actions a call UI triggers: start, hang up,
/// mute toggles, screen share. Media capture is a collaborator behind the
/// `MediaCapture` trait.
///
/// WebRTC requires out of band signaling. The controller only constructs
/// session descriptions; they come out on the event channel
/// (`EmittedEvents::LocalDescriptionReady`, `EmittedEvents::Ice`) and the
/// answers/candidates from the remote side come back in through
/// `apply_remote_description` and `add_remote_ice_candidate`.
pub struct Controller {
    api: webrtc::api::API,
    config: RtcConfig,
    capture: Arc<dyn MediaCapture>,
    /// used to emit events
    emitted_event_chan: mpsc::UnboundedSender<EmittedEvents>,
    local: Option<LocalMedia>,
    session: Option<Session>,
    /// read by peer-connection callbacks and the screen-share watcher
    shared: Arc<Shared>,
}

// a lazy version of the builder pattern
pub struct InitArgs {
    pub config: RtcConfig,
    pub capture: Arc<dyn MediaCapture>,
    pub emitted_event_chan: mpsc::UnboundedSender<EmittedEvents>,
}

/// The following functions are driven by the UI:
/// init_media
/// start_call
/// hang_up
/// toggle_video / toggle_audio
/// start_screen_share
/// remote_control
///
/// The following functions are driven by signaling:
/// accept_call
/// apply_remote_description
/// add_remote_ice_candidate
impl Controller {
    pub fn init(args: InitArgs) -> Result<Self, Error> {
        Ok(Self {
            api: create_api()?,
            config: args.config,
            capture: args.capture,
            emitted_event_chan: args.emitted_event_chan,
            local: None,
            session: None,
            shared: Arc::new(Shared::new()),
        })
    }

    /// Requests camera + microphone access from the capture collaborator and
    /// binds the camera to the local preview. Failure leaves the controller
    /// idle; the reason lands in the status text.
    pub async fn init_media(&mut self, constraints: MediaConstraints) -> Result<(), Error> {
        if self.local.as_ref().map(|l| l.is_live()).unwrap_or(false) {
            return Err(Error::InvalidState {
                action: "initialize media",
                state: self.state(),
            });
        }
        match self.capture.request_user_media(constraints).await {
            Ok(local) => {
                self.local = Some(local);
                self.shared.set_preview(Some(Preview::Camera));
                self.shared.set_status(STATUS_MEDIA_READY);
                Ok(())
            }
            Err(e) => {
                self.shared.set_status(&e.to_string());
                Err(e)
            }
        }
    }

    /// Creates the session, attaches every local track as a sender, produces
    /// an offer and emits it as `LocalDescriptionReady` - exactly once. The
    /// precondition check runs before the first await, so a second trigger
    /// while setup is pending is rejected instead of interleaved.
    pub async fn start_call(&mut self) -> Result<(), Error> {
        if self.session.is_some() || !self.local.as_ref().map(|l| l.is_live()).unwrap_or(false) {
            return Err(Error::InvalidState {
                action: "start a call",
                state: self.state(),
            });
        }

        let (connection, id) = self.open_connection().await?;
        match self.negotiate(&connection, None).await {
            Ok(senders) => {
                self.session = Some(Session {
                    id,
                    connection,
                    senders,
                });
                self.shared.set_status(STATUS_CALL_STARTED);
                Ok(())
            }
            Err(e) => {
                self.abort_setup(connection).await;
                self.shared.set_status(&format!("call failed: {}", e));
                Err(e)
            }
        }
    }

    /// Inbound-offer counterpart of `start_call`: same session construction,
    /// but the remote offer is applied first and the emitted description is
    /// an answer.
    pub async fn accept_call(&mut self, offer: RTCSessionDescription) -> Result<(), Error> {
        if self.session.is_some() || !self.local.as_ref().map(|l| l.is_live()).unwrap_or(false) {
            return Err(Error::InvalidState {
                action: "accept a call",
                state: self.state(),
            });
        }

        let (connection, id) = self.open_connection().await?;
        match self.negotiate(&connection, Some(offer)).await {
            Ok(senders) => {
                self.session = Some(Session {
                    id,
                    connection,
                    senders,
                });
                self.shared.set_status(STATUS_CALL_STARTED);
                Ok(())
            }
            Err(e) => {
                self.abort_setup(connection).await;
                self.shared.set_status(&format!("call failed: {}", e));
                Err(e)
            }
        }
    }

    /// Ends the session: stops the screen share if one is running, closes
    /// the peer connection (which ends the remote tracks) and clears the
    /// remote sink. Local media stays live for the next call. Calling this
    /// with no session is a no-op, not an error.
    pub async fn hang_up(&mut self) {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                log::debug!("hang up without an active session is a no-op");
                return;
            }
        };
        self.shared.clear_session();
        if let Some(screen) = self.shared.take_screen() {
            screen.video.stop();
        }
        if let Err(e) = session.connection.close().await {
            log::error!("failed to close peer connection: {}", e);
        }
        if let Some(remote) = self.shared.take_remote() {
            log::debug!("released {} remote track(s)", remote.tracks.len());
        }
        let live = self.local.as_ref().map(|l| l.is_live()).unwrap_or(false);
        self.shared.set_preview(live.then_some(Preview::Camera));
        self.shared.set_status(STATUS_CALL_ENDED);
    }

    /// Flips the camera mute flag in place; capture keeps running and the
    /// connection is not renegotiated. Returns the new value, or `None` when
    /// there is no video track (which is not an error).
    pub fn toggle_video(&self) -> Option<bool> {
        let track = self.local.as_ref()?.video.as_ref()?;
        let enabled = track.toggle_enabled();
        log::debug!("camera {}", if enabled { "enabled" } else { "muted" });
        Some(enabled)
    }

    /// Same as `toggle_video`, for the microphone.
    pub fn toggle_audio(&self) -> Option<bool> {
        let track = self.local.as_ref()?.audio.as_ref()?;
        let enabled = track.toggle_enabled();
        log::debug!("microphone {}", if enabled { "enabled" } else { "muted" });
        Some(enabled)
    }

    /// Requests display capture and substitutes the screen track into the
    /// existing video sender - a track swap, not a renegotiation. A watcher
    /// task puts the camera back when the share ends, whether through this
    /// crate or because the producer stopped on its own.
    pub async fn start_screen_share(&mut self) -> Result<(), Error> {
        let state = self.state();
        if state != SessionState::InCall {
            return Err(Error::InvalidState {
                action: "share the screen",
                state,
            });
        }
        let Some(session) = self.session.as_ref() else {
            return Err(Error::InvalidState {
                action: "share the screen",
                state,
            });
        };
        let sender = session
            .video_sender()
            .cloned()
            .ok_or_else(|| Error::ScreenShare {
                reason: "call has no outgoing video".into(),
            })?;
        let camera = self
            .local
            .as_ref()
            .and_then(|l| l.video.clone())
            .ok_or_else(|| Error::ScreenShare {
                reason: "no camera track to return to".into(),
            })?;
        let session_id = session.id();

        let screen = match self.capture.request_display_media().await {
            Ok(screen) => screen,
            Err(e) => {
                let err = Error::ScreenShare { reason: e.reason() };
                self.shared.set_status(&err.to_string());
                return Err(err);
            }
        };

        let screen_track = screen.video.clone();
        let outgoing: Arc<dyn TrackLocal + Send + Sync> = screen_track.rtc();
        if let Err(e) = sender.replace_track(Some(outgoing)).await {
            screen_track.stop();
            let err = Error::from(e);
            self.shared.set_status(&format!("screen share failed: {}", err));
            return Err(err);
        }

        self.shared.set_screen(screen);
        self.shared.set_preview(Some(Preview::Screen));
        self.shared.set_status(STATUS_SCREEN_SHARE_ACTIVE);

        // the share can end without any action on this UI (the producer goes
        // away); the watcher restores the camera either way. It re-checks the
        // session id first: a hang-up may have won the race.
        let shared = self.shared.clone();
        let tx = self.emitted_event_chan.clone();
        let camera_rtc: Arc<dyn TrackLocal + Send + Sync> = camera.rtc();
        tokio::spawn(async move {
            screen_track.ended().await;
            if shared.session_id() != Some(session_id) {
                log::debug!("screen share outlived its session; nothing to restore");
                return;
            }
            if shared.take_screen().is_none() {
                return;
            }
            if let Err(e) = sender.replace_track(Some(camera_rtc)).await {
                log::error!("failed to restore camera track: {}", e);
            }
            shared.set_preview(Some(Preview::Camera));
            shared.set_status(STATUS_SCREEN_SHARE_ENDED);
            if tx.send(EmittedEvents::ScreenShareEnded).is_err() {
                log::debug!("event channel closed before screen share ended");
            }
        });
        Ok(())
    }

    /// Placeholder. Surfaces a notice and changes nothing.
    pub fn remote_control(&self) -> Result<(), Error> {
        self.shared.set_status(STATUS_REMOTE_CONTROL);
        Err(Error::NotImplemented("remote control"))
    }

    /// pass the answer (or an updated description) from the remote side to
    /// the session
    pub async fn apply_remote_description(
        &self,
        sdp: RTCSessionDescription,
    ) -> Result<(), Error> {
        let Some(session) = self.session.as_ref() else {
            return Err(Error::InvalidState {
                action: "apply a remote description",
                state: self.state(),
            });
        };
        session.connection.set_remote_description(sdp).await?;
        Ok(())
    }

    /// pass an ICE candidate from the remote side to the session
    pub async fn add_remote_ice_candidate(
        &self,
        candidate: RTCIceCandidateInit,
    ) -> Result<(), Error> {
        let Some(session) = self.session.as_ref() else {
            return Err(Error::InvalidState {
                action: "add an ice candidate",
                state: self.state(),
            });
        };
        session.connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Hangs up and stops local capture. After this the controller is idle;
    /// stopped tracks are gone for good and `init_media` has to run again.
    pub async fn deinit(&mut self) {
        self.hang_up().await;
        if let Some(local) = self.local.take() {
            local.stop();
            self.shared.set_preview(None);
            self.shared.set_status(STATUS_MEDIA_RELEASED);
        }
    }

    /// Derived from which resources exist right now; never stored.
    pub fn state(&self) -> SessionState {
        if self.session.is_some() {
            if self.shared.screen_active() {
                SessionState::ScreenSharing
            } else {
                SessionState::InCall
            }
        } else if self.local.as_ref().map(|l| l.is_live()).unwrap_or(false) {
            SessionState::MediaReady
        } else {
            SessionState::Idle
        }
    }

    /// Button enablement and status text as a pure function of the current
    /// resources.
    pub fn ui_state(&self) -> UiState {
        let state = self.state();
        UiState {
            state,
            can_start: state == SessionState::MediaReady,
            can_hang_up: self.session.is_some(),
            can_share_screen: state == SessionState::InCall,
            video_enabled: self
                .local
                .as_ref()
                .and_then(|l| l.video.as_ref())
                .map(|t| t.is_enabled()),
            audio_enabled: self
                .local
                .as_ref()
                .and_then(|l| l.audio.as_ref())
                .map(|t| t.is_enabled()),
            status: self.shared.status(),
        }
    }

    pub fn status(&self) -> String {
        self.shared.status()
    }

    /// which stream the local preview sink shows
    pub fn local_preview(&self) -> Option<Preview> {
        self.shared.preview()
    }

    /// the remote sink: the first stream received from the peer
    pub fn remote_media(&self) -> Option<RemoteMedia> {
        self.shared.remote()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local.as_ref()
    }

    /// creates the peer connection and wires its callbacks. called by
    /// start_call and accept_call
    async fn open_connection(&self) -> Result<(Arc<RTCPeerConnection>, Uuid), Error> {
        let connection = Arc::new(self.api.new_peer_connection(self.config.to_rtc()).await?);
        let id = Uuid::new_v4();

        // send discovered ice candidates (for self) to the signaling side
        let tx = self.emitted_event_chan.clone();
        connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(candidate) = c {
                    if let Err(e) = tx.send(EmittedEvents::Ice {
                        candidate: Box::new(candidate),
                    }) {
                        log::error!("failed to emit ice candidate: {}", e);
                    }
                }
            })
        }));

        // notifies when the peer has connected/disconnected
        let tx = self.emitted_event_chan.clone();
        connection.on_ice_connection_state_change(Box::new(
            move |connection_state: RTCIceConnectionState| {
                log::info!("ice connection state changed to {}", connection_state);
                if connection_state == RTCIceConnectionState::Failed {
                    if let Err(e) = tx.send(EmittedEvents::Disconnected) {
                        log::error!("failed to emit disconnect: {}", e);
                    }
                }
                Box::pin(async {})
            },
        ));

        // bind the first remote stream for rendering
        let tx = self.emitted_event_chan.clone();
        let shared = self.shared.clone();
        connection.on_track(Box::new(
            move |track: Option<Arc<TrackRemote>>, _receiver: Option<Arc<RTCRtpReceiver>>| {
                let tx = tx.clone();
                let shared = shared.clone();
                Box::pin(async move {
                    if let Some(track) = track {
                        let stream_id = track.stream_id().await;
                        if shared.bind_remote_track(stream_id, track.clone()) {
                            if let Err(e) = tx.send(EmittedEvents::RemoteTrackAdded { track }) {
                                log::error!("failed to emit remote track: {}", e);
                            }
                        }
                    }
                })
            },
        ));

        self.shared.set_session(id);
        Ok((connection, id))
    }

    /// Attaches local tracks and produces this side's description: an offer,
    /// or an answer when a remote offer is supplied. Emits the description
    /// once it is set locally.
    async fn negotiate(
        &self,
        connection: &Arc<RTCPeerConnection>,
        remote_offer: Option<RTCSessionDescription>,
    ) -> Result<Vec<(TrackKind, Arc<RTCRtpSender>)>, Error> {
        let Some(local) = self.local.as_ref() else {
            return Err(Error::InvalidState {
                action: "negotiate",
                state: SessionState::Idle,
            });
        };

        let answering = remote_offer.is_some();
        if let Some(offer) = remote_offer {
            connection.set_remote_description(offer).await?;
        }

        let mut senders = Vec::new();
        for track in local.tracks() {
            let sender = connection.add_track(track.rtc()).await?;
            senders.push((track.kind(), sender));
        }

        let sdp = if answering {
            connection.create_answer(None).await?
        } else {
            connection.create_offer(None).await?
        };
        // this also starts ICE gathering
        connection.set_local_description(sdp.clone()).await?;
        self.emit(EmittedEvents::LocalDescriptionReady { sdp: Box::new(sdp) })?;

        Ok(senders)
    }

    /// tears down a connection whose setup failed partway
    async fn abort_setup(&self, connection: Arc<RTCPeerConnection>) {
        self.shared.clear_session();
        self.shared.take_remote();
        if let Err(e) = connection.close().await {
            log::error!("failed to close aborted connection: {}", e);
        }
    }

    fn emit(&self, event: EmittedEvents) -> Result<(), Error> {
        self.emitted_event_chan
            .send(event)
            .map_err(|_| Error::ChannelClosed)
    }
}

// todo: add support for more codecs. perhaps make it configurable
fn create_api() -> Result<webrtc::api::API, Error> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;

    // the user configurable RTP/RTCP pipeline: NACKs, RTCP reports etc.
    // must be created per API object when building it by hand
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media)?;

    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}
