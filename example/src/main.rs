use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

use simple_call::media::{source_once, MicrophoneSource, RtpSourceCapture};
use simple_call::testing::{
    send_answer, send_hangup, send_ice, send_offer, set_signal_tx_chan, signaling_server,
    IcePayload, SdpPayload, SignalEvent,
};
use simple_call::{Controller, EmittedEvents, InitArgs, MediaConstraints, RtcConfig};

/// An audio call between two instances of this binary, signaled over the
/// dev test server. All five UI actions are available on stdin.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// the signaling address for this process
    local: String,
    /// the signaling address of the remote peer
    remote: String,
    /// start the call from this side once media is ready
    #[arg(long)]
    dial: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%3f"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Debug)
        .init();

    let cli = Cli::parse();

    // signals decoded by the test server
    let (signal_tx, signal_rx) = mpsc::unbounded_channel::<SignalEvent>();
    // events emitted by the controller
    let (event_tx, event_rx) = mpsc::unbounded_channel::<EmittedEvents>();

    // microphone -> opus -> RTP. camera and screen are placeholder channels
    // that never carry packets but keep the video plumbing (toggles, screen
    // share) exercisable from the command loop.
    let (mic, mic_rx) = MicrophoneSource::init(48000, opus::Channels::Mono)?;
    mic.play()?;
    let (_camera_tx, camera_rx) = mpsc::unbounded_channel();
    let (_screen_tx, screen_rx) = mpsc::unbounded_channel();
    let capture = RtpSourceCapture::new()
        .with_microphone(source_once(mic_rx))
        .with_camera(source_once(camera_rx))
        .with_screen(source_once(screen_rx));

    let controller = Controller::init(InitArgs {
        config: RtcConfig::default(),
        capture: Arc::new(capture),
        emitted_event_chan: event_tx,
    })?;
    let controller = Arc::new(Mutex::new(controller));

    {
        let mut c = controller.lock().await;
        c.init_media(MediaConstraints::default()).await?;
        if cli.dial {
            c.start_call().await?;
        }
    }

    set_signal_tx_chan(signal_tx).await;

    tokio::select! {
        _ = signaling_server(&cli.local) => {
            println!("signaling terminated");
        }
        r = handle_events(cli.local.clone(), cli.remote.clone(), controller.clone(), event_rx) => {
            println!("event loop terminated: {:?}", r);
        }
        r = handle_signals(controller.clone(), signal_rx) => {
            println!("signal loop terminated: {:?}", r);
        }
        r = handle_commands(cli.local.clone(), cli.remote.clone(), controller.clone()) => {
            println!("command loop terminated: {:?}", r);
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
        }
    }

    {
        let mut c = controller.lock().await;
        c.deinit().await;
    }

    Ok(())
}

/// forwards controller events to the signaling side
async fn handle_events(
    local: String,
    remote: String,
    controller: Arc<Mutex<Controller>>,
    mut rx: mpsc::UnboundedReceiver<EmittedEvents>,
) -> Result<()> {
    while let Some(event) = rx.recv().await {
        match event {
            EmittedEvents::LocalDescriptionReady { sdp } => {
                let sdp_type = sdp.sdp_type;
                let payload = SdpPayload {
                    src: local.clone(),
                    sdp: *sdp,
                };
                match sdp_type {
                    RTCSdpType::Offer => send_offer(&remote, payload).await?,
                    RTCSdpType::Answer => send_answer(&remote, payload).await?,
                    other => log::warn!("not forwarding a {} description", other),
                }
            }
            EmittedEvents::Ice { candidate } => {
                let payload = IcePayload {
                    src: local.clone(),
                    candidate: candidate.to_json()?,
                };
                send_ice(&remote, payload).await?;
            }
            EmittedEvents::RemoteTrackAdded { track } => {
                log::info!(
                    "remote track added: {} (stream {})",
                    track.id().await,
                    track.stream_id().await
                );
            }
            EmittedEvents::ScreenShareEnded => {
                log::info!("screen share ended; camera restored");
            }
            EmittedEvents::Disconnected => {
                log::info!("peer connection failed; hanging up");
                controller.lock().await.hang_up().await;
            }
        }
    }
    Ok(())
}

/// applies signals from the remote side to the controller
async fn handle_signals(
    controller: Arc<Mutex<Controller>>,
    mut rx: mpsc::UnboundedReceiver<SignalEvent>,
) -> Result<()> {
    while let Some(signal) = rx.recv().await {
        match signal {
            SignalEvent::Offer(payload) => {
                log::debug!("signal: offer from {}", payload.src);
                let mut c = controller.lock().await;
                if let Err(e) = c.accept_call(payload.sdp).await {
                    log::error!("failed to accept call: {}", e);
                    c.hang_up().await;
                }
            }
            SignalEvent::Answer(payload) => {
                log::debug!("signal: answer from {}", payload.src);
                let c = controller.lock().await;
                if let Err(e) = c.apply_remote_description(payload.sdp).await {
                    log::error!("failed to apply answer: {}", e);
                }
            }
            SignalEvent::Ice(payload) => {
                log::debug!("signal: ice from {}", payload.src);
                let c = controller.lock().await;
                if let Err(e) = c.add_remote_ice_candidate(payload.candidate).await {
                    log::error!("failed to add ice candidate: {}", e);
                }
            }
            SignalEvent::HangUp(src) => {
                log::debug!("signal: hang up from {}", src);
                controller.lock().await.hang_up().await;
            }
        }
    }
    Ok(())
}

/// the "buttons": every controller action, driven from stdin
async fn handle_commands(
    local: String,
    remote: String,
    controller: Arc<Mutex<Controller>>,
) -> Result<()> {
    println!("commands: call, hangup, video, audio, share, rc, state, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "call" => {
                if let Err(e) = controller.lock().await.start_call().await {
                    log::error!("{}", e);
                }
            }
            "hangup" => {
                controller.lock().await.hang_up().await;
                if let Err(e) = send_hangup(&remote, &local).await {
                    log::error!("failed to notify peer: {}", e);
                }
            }
            "video" => match controller.lock().await.toggle_video() {
                Some(enabled) => println!("camera enabled: {}", enabled),
                None => println!("no video track"),
            },
            "audio" => match controller.lock().await.toggle_audio() {
                Some(enabled) => println!("microphone enabled: {}", enabled),
                None => println!("no audio track"),
            },
            "share" => {
                if let Err(e) = controller.lock().await.start_screen_share().await {
                    log::error!("{}", e);
                }
            }
            "rc" => {
                let c = controller.lock().await;
                let _ = c.remote_control();
                println!("{}", c.status());
            }
            "state" => {
                println!("{:?}", controller.lock().await.ui_state());
            }
            "quit" => break,
            "" => {}
            other => println!("unknown command: {}", other),
        }
    }
    Ok(())
}
