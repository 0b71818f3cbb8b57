use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::IceServerConfig;
use crate::rtc::{
    ConnectionState, LocalTrack, MessageChannel, PeerConnection, PeerConnector, PeerEvent,
    PeerEventSender, TrackKind,
};
use crate::signaller::{NetworkCandidate, SdpKind, SessionDescription};
use crate::Result;

/// Opens peer connections through webrtc-rs.
pub struct WebRtcConnector {
    api: webrtc::api::API,
    config: RTCConfiguration,
}

impl WebRtcConnector {
    pub fn make_config(ice_servers: &[IceServerConfig]) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn new(config: RTCConfiguration) -> Result<Self> {
        info!("Initializing WebRTC");
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        // Each peer connection needs its own registry; the default set gives
        // NACKs and RTCP reports.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        Ok(Self {
            api: APIBuilder::new()
                .with_media_engine(m)
                .with_interceptor_registry(registry)
                .build(),
            config,
        })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>> {
        debug!("Opening a new WebRTC peer connection");
        let peer_connection = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);

        let ice_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = ice_events.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => PeerEvent::CandidateDiscovered(init.into()),
                        Err(err) => {
                            warn!("Dropping unserializable ICE candidate: {}", err);
                            return;
                        }
                    },
                    // a null candidate marks the end of gathering
                    None => PeerEvent::GatheringComplete,
                };
                let _ = events.send(event);
            })
        }));

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let _ = state_events.send(PeerEvent::ConnectionStateChanged(state.into()));
                Box::pin(async {})
            },
        ));

        let track_events = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(TrackKind::Audio),
                    RTPCodecType::Video => Some(TrackKind::Video),
                    _ => None,
                };
                if let Some(kind) = kind {
                    let _ = track_events.send(PeerEvent::Track(kind));
                }
                Box::pin(async {})
            },
        ));

        let channel_events = events.clone();
        peer_connection.on_data_channel(Box::new(move |data_channel: Arc<RTCDataChannel>| {
            let events = channel_events.clone();
            Box::pin(async move {
                debug!("Remote opened data channel {}", data_channel.label());
                let channel = WebRtcChannel::attach(data_channel, events.clone());
                let _ = events.send(PeerEvent::ChannelOpened(channel));
            })
        }));

        Ok(Arc::new(WebRtcPeer {
            peer_connection,
            video_sender: Mutex::new(None),
            events,
        }))
    }
}

struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    events: PeerEventSender,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self.peer_connection.add_track(track.rtc_track()).await?;
        if track.kind() == TrackKind::Video {
            *self.video_sender.lock().await = Some(sender);
        }
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<()> {
        if track.kind() != TrackKind::Video {
            anyhow::bail!("only video tracks can be replaced");
        }
        let sender = self
            .video_sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no outgoing video track to replace"))?;
        sender.replace_track(Some(track.rtc_track())).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await?;
        Ok(())
    }

    async fn create_channel(&self, label: &str) -> Result<Arc<dyn MessageChannel>> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let data_channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await?;
        Ok(WebRtcChannel::attach(data_channel, self.events.clone()))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

struct WebRtcChannel {
    data_channel: Arc<RTCDataChannel>,
}

impl fmt::Debug for WebRtcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcChannel")
            .field("label", &self.data_channel.label())
            .field("ready_state", &self.data_channel.ready_state())
            .finish()
    }
}

impl WebRtcChannel {
    fn attach(data_channel: Arc<RTCDataChannel>, events: PeerEventSender) -> Arc<dyn MessageChannel> {
        let label = data_channel.label().to_owned();
        data_channel.on_open(Box::new(move || {
            Box::pin(async move {
                info!("Data channel {} open", label);
            })
        }));
        data_channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let _ = events.send(PeerEvent::Message(msg.data));
            Box::pin(async {})
        }));
        Arc::new(Self { data_channel })
    }
}

#[async_trait]
impl MessageChannel for WebRtcChannel {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.data_channel.send(&data).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.data_channel.ready_state() == RTCDataChannelState::Open
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    })
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

impl From<RTCIceCandidateInit> for NetworkCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<NetworkCandidate> for RTCIceCandidateInit {
    fn from(candidate: NetworkCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_conversion_keeps_every_field() {
        let candidate = NetworkCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };
        let init: RTCIceCandidateInit = candidate.clone().into();
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(NetworkCandidate::from(init), candidate);
    }

    #[test]
    fn candidate_json_matches_browser_shape() {
        let candidate = NetworkCandidate {
            candidate: "candidate:1".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(1),
            username_fragment: None,
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 1);
        assert!(json.get("usernameFragment").is_none());
    }

    #[test]
    fn ice_servers_from_config() {
        let config = WebRtcConnector::make_config(&[
            IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".into()],
                username: String::new(),
                credential: String::new(),
            },
            IceServerConfig {
                urls: vec!["turn:turn.example.org:3478".into()],
                username: "mira".into(),
                credential: "secret".into(),
            },
        ]);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1].username, "mira");
    }

    #[test]
    fn connection_states_map() {
        assert_eq!(
            ConnectionState::from(RTCPeerConnectionState::Connected),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::from(RTCPeerConnectionState::Unspecified),
            ConnectionState::New
        );
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn channel_debug_names_the_label() {
        let connector = WebRtcConnector::new(WebRtcConnector::make_config(&[])).unwrap();
        let (events, _receiver) = tokio::sync::mpsc::unbounded_channel();
        let peer = connector.connect(events).await.unwrap();

        let channel = peer.create_channel("chat").await.unwrap();
        assert!(format!("{:?}", channel).contains("chat"));
        assert!(!channel.is_open());
        peer.close().await.unwrap();
    }
}
