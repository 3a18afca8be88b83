use anyhow::Result;
use hyper::client::HttpConnector;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Client, Method, Request, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::sync::{mpsc, Mutex};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

// The controller needs out-of-band signaling before a call can form. This
// module is a development relay: two processes on a LAN can exchange
// offer/answer/ICE over plain HTTP and exercise the crate without a real
// signaling service behind it.
//
// Hyper's service function can't easily capture state, so the channel that
// receives decoded signals lives in a static.

lazy_static! {
    static ref SIGNAL_CHAN: Mutex<Option<mpsc::UnboundedSender<SignalEvent>>> = Mutex::new(None);
}

#[derive(Serialize, Deserialize)]
pub struct SdpPayload {
    pub src: String,
    pub sdp: RTCSessionDescription,
}

#[derive(Serialize, Deserialize)]
pub struct IcePayload {
    pub src: String,
    pub candidate: RTCIceCandidateInit,
}

/// signals received over HTTP, decoded
pub enum SignalEvent {
    Offer(SdpPayload),
    Answer(SdpPayload),
    Ice(IcePayload),
    HangUp(String),
}

/// registers the channel that receives decoded signals
pub async fn set_signal_tx_chan(chan: mpsc::UnboundedSender<SignalEvent>) {
    let mut lock = SIGNAL_CHAN.lock().await;
    *lock = Some(chan);
}

pub async fn send_offer(remote_host: &str, payload: SdpPayload) -> Result<()> {
    send_signal(remote_host, "offer", serde_json::to_string(&payload)?).await
}

pub async fn send_answer(remote_host: &str, payload: SdpPayload) -> Result<()> {
    send_signal(remote_host, "answer", serde_json::to_string(&payload)?).await
}

pub async fn send_ice(remote_host: &str, payload: IcePayload) -> Result<()> {
    send_signal(remote_host, "ice", serde_json::to_string(&payload)?).await
}

pub async fn send_hangup(remote_host: &str, src: &str) -> Result<()> {
    send_signal(remote_host, "hangup", src.into()).await
}

async fn send_signal(remote_host: &str, route: &str, payload: String) -> Result<()> {
    let client = Client::builder().build::<_, Body>(HttpConnector::new());
    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/{}", remote_host, route))
        .header("content-type", "application/json; charset=utf-8")
        .body(Body::from(payload))?;
    if let Err(e) = client.request(req).await {
        log::error!("failed to deliver {} signal: {}", route, e);
        return Err(e.into());
    }
    Ok(())
}

/// serves the signaling routes until the process exits
pub async fn signaling_server(addr: &str) -> Result<()> {
    let addr = SocketAddr::from_str(addr)?;
    let service = make_service_fn(|_| async { Ok::<_, hyper::Error>(service_fn(remote_handler)) });
    let server = hyper::Server::bind(&addr).serve(service);
    if let Err(e) = server.await {
        log::error!("signaling server error: {}", e);
    }
    Ok(())
}

async fn remote_handler(req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let status = match (&parts.method, parts.uri.path()) {
        (&Method::POST, "/offer") => match parse_body::<SdpPayload>(body).await {
            Ok(payload) => forward(SignalEvent::Offer(payload)).await,
            Err(status) => status,
        },
        (&Method::POST, "/answer") => match parse_body::<SdpPayload>(body).await {
            Ok(payload) => forward(SignalEvent::Answer(payload)).await,
            Err(status) => status,
        },
        (&Method::POST, "/ice") => match parse_body::<IcePayload>(body).await {
            Ok(payload) => forward(SignalEvent::Ice(payload)).await,
            Err(status) => status,
        },
        (&Method::POST, "/hangup") => match read_body(body).await {
            Ok(src) => forward(SignalEvent::HangUp(src)).await,
            Err(status) => status,
        },
        _ => StatusCode::NOT_FOUND,
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    Ok(response)
}

async fn read_body(body: Body) -> Result<String, StatusCode> {
    let bytes = hyper::body::to_bytes(body).await.map_err(|e| {
        log::error!("failed to read signal body: {}", e);
        StatusCode::BAD_REQUEST
    })?;
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        log::error!("signal body is not utf-8: {}", e);
        StatusCode::BAD_REQUEST
    })
}

async fn parse_body<T: DeserializeOwned>(body: Body) -> Result<T, StatusCode> {
    let text = read_body(body).await?;
    serde_json::from_str(&text).map_err(|e| {
        log::error!("failed to decode signal payload: {}", e);
        StatusCode::BAD_REQUEST
    })
}

async fn forward(signal: SignalEvent) -> StatusCode {
    let lock = SIGNAL_CHAN.lock().await;
    match &*lock {
        Some(chan) => {
            if chan.send(signal).is_err() {
                log::error!("signal consumer went away");
                return StatusCode::SERVICE_UNAVAILABLE;
            }
            StatusCode::OK
        }
        None => {
            log::error!("no signal consumer registered");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
