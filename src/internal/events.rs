use std::sync::Arc;

use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_remote::TrackRemote;

/// Events emitted toward the embedding application. Signaling transport is
/// deliberately not part of this crate: whoever consumes these events owns
/// delivery of descriptions and candidates to the remote peer.
pub enum EmittedEvents {
    /// a local session description (offer or answer) was set and must be
    /// forwarded to the remote peer
    LocalDescriptionReady { sdp: Box<RTCSessionDescription> },
    /// a local ICE candidate was discovered and must be forwarded to the
    /// remote peer
    Ice { candidate: Box<RTCIceCandidate> },
    /// the peer added a track; hand it to the rendering surface
    RemoteTrackAdded { track: Arc<TrackRemote> },
    /// the screen share ended and the camera track was put back
    ScreenShareEnded,
    /// ICE gave up on the connection
    Disconnected,
}
