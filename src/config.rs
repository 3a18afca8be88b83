use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// A single STUN/TURN endpoint. Credentials are empty for plain STUN.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// ICE configuration injected into the controller at construction. Nothing in
/// the controller hard-codes an endpoint; the default is only a convenience
/// for applications that have no TURN deployment of their own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec![
                    "stun:stun.l.google.com:19302".into(),
                    "stun:stun1.l.google.com:19302".into(),
                ],
                ..Default::default()
            }],
        }
    }
}

impl RtcConfig {
    /// a config with no ICE servers at all. host candidates only - handy for
    /// tests and same-machine calls.
    pub fn no_ice() -> Self {
        Self {
            ice_servers: Vec::new(),
        }
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub(crate) fn to_rtc(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone(),
                    credential: s.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_stun_only() {
        let config = RtcConfig::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert!(config.ice_servers[0].username.is_empty());
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = r#"{"ice_servers":[{"urls":["turn:turn.example.com:3478"],"username":"u","credential":"c"}]}"#;
        let config = RtcConfig::from_json(json).unwrap();
        assert_eq!(config.ice_servers[0].urls[0], "turn:turn.example.com:3478");
        assert_eq!(config.ice_servers[0].username, "u");
        let rtc = config.to_rtc();
        assert_eq!(rtc.ice_servers.len(), 1);
    }
}
