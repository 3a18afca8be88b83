use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp;
use webrtc::track::track_local::TrackLocal;

use simple_call::media::{source_once, RtpSourceCapture};
use simple_call::{
    Controller, EmittedEvents, Error, InitArgs, MediaConstraints, Preview, RtcConfig, SessionState,
    STATUS_CALL_ENDED, STATUS_MEDIA_READY, STATUS_REMOTE_CONTROL, STATUS_SCREEN_SHARE_ACTIVE,
    STATUS_SCREEN_SHARE_ENDED,
};

type PacketSender = mpsc::UnboundedSender<rtp::packet::Packet>;

struct Harness {
    controller: Controller,
    events: mpsc::UnboundedReceiver<EmittedEvents>,
    _camera_tx: PacketSender,
    _mic_tx: PacketSender,
    screen_tx: Option<PacketSender>,
}

/// camera + microphone + screen, all fed by channels nobody writes to
fn harness() -> Harness {
    let (camera_tx, camera_rx) = mpsc::unbounded_channel();
    let (mic_tx, mic_rx) = mpsc::unbounded_channel();
    let (screen_tx, screen_rx) = mpsc::unbounded_channel();
    let capture = RtpSourceCapture::new()
        .with_camera(source_once(camera_rx))
        .with_microphone(source_once(mic_rx))
        .with_screen(source_once(screen_rx));
    let (controller, events) = controller_with(capture);
    Harness {
        controller,
        events,
        _camera_tx: camera_tx,
        _mic_tx: mic_tx,
        screen_tx: Some(screen_tx),
    }
}

fn controller_with(
    capture: RtpSourceCapture,
) -> (Controller, mpsc::UnboundedReceiver<EmittedEvents>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let controller = Controller::init(InitArgs {
        // no STUN/TURN: keeps the tests off the network
        config: RtcConfig::no_ice(),
        capture: Arc::new(capture),
        emitted_event_chan: event_tx,
    })
    .expect("controller init");
    (controller, event_rx)
}

fn drain(events: &mut mpsc::UnboundedReceiver<EmittedEvents>) -> Vec<EmittedEvents> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn offers_in(events: &[EmittedEvents]) -> Vec<RTCSessionDescription> {
    events
        .iter()
        .filter_map(|e| match e {
            EmittedEvents::LocalDescriptionReady { sdp } => Some((**sdp).clone()),
            _ => None,
        })
        .collect()
}

async fn outgoing_video_track_id(controller: &Controller) -> String {
    let sender = controller
        .session()
        .expect("active session")
        .video_sender()
        .expect("video sender")
        .clone();
    sender.track().await.expect("bound track").id().to_string()
}

#[tokio::test]
async fn init_media_reaches_media_ready() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();

    assert_eq!(h.controller.state(), SessionState::MediaReady);
    assert_eq!(h.controller.local_preview(), Some(Preview::Camera));
    assert_eq!(h.controller.status(), STATUS_MEDIA_READY);
    let ui = h.controller.ui_state();
    assert!(ui.can_start);
    assert!(!ui.can_hang_up);
    assert!(!ui.can_share_screen);
}

#[tokio::test]
async fn denied_media_access_stays_idle() {
    let (mut controller, _events) = controller_with(RtpSourceCapture::new());
    let err = controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MediaAccess { .. }));
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.status().starts_with("media access failed"));
}

#[tokio::test]
async fn toggle_video_follows_call_parity() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();

    for calls in 1..=5 {
        let enabled = h.controller.toggle_video().expect("video track present");
        assert_eq!(enabled, calls % 2 == 0);
        assert_eq!(h.controller.ui_state().video_enabled, Some(enabled));
    }
}

#[tokio::test]
async fn toggle_on_a_missing_track_is_a_silent_noop() {
    let (_mic_tx, mic_rx) = mpsc::unbounded_channel();
    let capture = RtpSourceCapture::new().with_microphone(source_once(mic_rx));
    let (mut controller, _events) = controller_with(capture);
    controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();

    assert_eq!(controller.toggle_video(), None);
    assert_eq!(controller.state(), SessionState::MediaReady);
    // the microphone toggle still works on an audio-only device
    assert_eq!(controller.toggle_audio(), Some(false));
}

#[tokio::test]
async fn start_call_emits_exactly_one_local_description() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    h.controller.start_call().await.unwrap();

    assert_eq!(h.controller.state(), SessionState::InCall);
    let ui = h.controller.ui_state();
    assert!(!ui.can_start);
    assert!(ui.can_hang_up);

    let offers = offers_in(&drain(&mut h.events));
    assert_eq!(offers.len(), 1);
    assert!(!offers[0].sdp.is_empty());

    // the start action disables itself; a second trigger is rejected
    assert!(matches!(
        h.controller.start_call().await,
        Err(Error::InvalidState { .. })
    ));
}

#[tokio::test]
async fn start_call_without_media_is_rejected() {
    let mut h = harness();
    assert!(matches!(
        h.controller.start_call().await,
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(h.controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn hang_up_keeps_local_media_for_the_next_call() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    h.controller.start_call().await.unwrap();
    h.controller.hang_up().await;

    assert_eq!(h.controller.state(), SessionState::MediaReady);
    assert!(h.controller.local_media().expect("local media").is_live());
    assert!(h.controller.remote_media().is_none());
    assert_eq!(h.controller.local_preview(), Some(Preview::Camera));
    assert_eq!(h.controller.status(), STATUS_CALL_ENDED);

    // the session is reusable: a fresh call works immediately
    h.controller.start_call().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::InCall);
}

#[tokio::test]
async fn hang_up_with_no_session_changes_nothing() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    h.controller.hang_up().await;

    assert_eq!(h.controller.state(), SessionState::MediaReady);
    assert_eq!(h.controller.status(), STATUS_MEDIA_READY);
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn screen_share_outside_a_call_is_rejected() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();

    assert!(matches!(
        h.controller.start_screen_share().await,
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(h.controller.state(), SessionState::MediaReady);
    assert_eq!(h.controller.local_preview(), Some(Preview::Camera));
}

#[tokio::test]
async fn screen_share_swaps_the_sender_and_reverts_when_the_share_ends() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    h.controller.start_call().await.unwrap();
    assert_eq!(outgoing_video_track_id(&h.controller).await, "camera");

    h.controller.start_screen_share().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::ScreenSharing);
    assert_eq!(h.controller.local_preview(), Some(Preview::Screen));
    assert_eq!(h.controller.status(), STATUS_SCREEN_SHARE_ACTIVE);
    assert_eq!(outgoing_video_track_id(&h.controller).await, "screen");

    // the user stops sharing via the platform, not via this UI: the
    // producer goes away and the track ends on its own
    h.screen_tx.take();
    timeout(Duration::from_secs(5), async {
        while h.controller.local_preview() != Some(Preview::Camera) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("screen share should revert to the camera");

    assert_eq!(h.controller.state(), SessionState::InCall);
    assert_eq!(outgoing_video_track_id(&h.controller).await, "camera");
    assert_eq!(h.controller.status(), STATUS_SCREEN_SHARE_ENDED);
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, EmittedEvents::ScreenShareEnded)));
}

#[tokio::test]
async fn denied_screen_share_leaves_the_call_running() {
    let (camera_tx, camera_rx) = mpsc::unbounded_channel::<rtp::packet::Packet>();
    let (mic_tx, mic_rx) = mpsc::unbounded_channel::<rtp::packet::Packet>();
    let capture = RtpSourceCapture::new()
        .with_camera(source_once(camera_rx))
        .with_microphone(source_once(mic_rx));
    let (mut controller, _events) = controller_with(capture);
    controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    controller.start_call().await.unwrap();

    let err = controller.start_screen_share().await.unwrap_err();
    assert!(matches!(err, Error::ScreenShare { .. }));
    assert_eq!(controller.state(), SessionState::InCall);
    assert_eq!(outgoing_video_track_id(&controller).await, "camera");
    assert!(controller.status().starts_with("screen share failed"));

    drop(camera_tx);
    drop(mic_tx);
}

#[tokio::test]
async fn hang_up_during_a_share_tears_everything_down() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    h.controller.start_call().await.unwrap();
    h.controller.start_screen_share().await.unwrap();

    h.controller.hang_up().await;
    assert_eq!(h.controller.state(), SessionState::MediaReady);
    assert_eq!(h.controller.local_preview(), Some(Preview::Camera));

    // the watcher notices the session is gone and stays quiet
    sleep(Duration::from_millis(200)).await;
    assert!(!drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, EmittedEvents::ScreenShareEnded)));
}

#[tokio::test]
async fn remote_control_is_a_stub() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();

    assert!(matches!(
        h.controller.remote_control(),
        Err(Error::NotImplemented(_))
    ));
    assert_eq!(h.controller.state(), SessionState::MediaReady);
    assert_eq!(h.controller.status(), STATUS_REMOTE_CONTROL);
}

#[tokio::test]
async fn signaling_inbound_requires_a_session() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();

    let sdp = RTCSessionDescription::default();
    assert!(matches!(
        h.controller.apply_remote_description(sdp).await,
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        h.controller
            .add_remote_ice_candidate(Default::default())
            .await,
        Err(Error::InvalidState { .. })
    ));
}

#[tokio::test]
async fn deinit_releases_media_for_good() {
    let mut h = harness();
    h.controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    h.controller.start_call().await.unwrap();
    h.controller.deinit().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.controller.local_preview(), None);
    // stopped tracks cannot come back; these channel sources are spent
    assert!(matches!(
        h.controller.init_media(MediaConstraints::default()).await,
        Err(Error::MediaAccess { .. })
    ));
}

#[tokio::test]
async fn offer_and_answer_negotiate_between_two_controllers() {
    let mut caller = harness();
    let mut callee = harness();
    caller
        .controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();
    callee
        .controller
        .init_media(MediaConstraints::default())
        .await
        .unwrap();

    caller.controller.start_call().await.unwrap();
    let offer = offers_in(&drain(&mut caller.events)).remove(0);

    callee.controller.accept_call(offer).await.unwrap();
    assert_eq!(callee.controller.state(), SessionState::InCall);
    let answer = offers_in(&drain(&mut callee.events)).remove(0);
    assert!(!answer.sdp.is_empty());

    caller
        .controller
        .apply_remote_description(answer)
        .await
        .unwrap();
    assert_eq!(caller.controller.state(), SessionState::InCall);
}
