//! Protocol session of one recording channel.
//!
//! A session walks `NULL -> START -> SETUP -> RECORD <-> PAUSE` and falls
//! into `DISCONNECT` when closed, normally or on error. A disconnected
//! session is reopened by the next [`Session::start`].

pub mod transport;

pub use transport::{
    ConnectionParams, Connector, LoggingConnector, MemoryConnector, RecorderConnection,
    TransportError, Verb,
};

use rtp::packet::Packet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ChannelConfig, Ed137Version, SessionDescription};
use crate::crd::{map_disconnect_cause, CallRecord, Property};
use crate::protocol::{ChannelKey, RecorderKind};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Null,
    Start,
    Announce,
    Setup,
    Record,
    Pause,
    Disconnect,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid recorder URL: {0}")]
    InvalidUrl(String),

    #[error("session has no open connection")]
    NotConnected,
}

pub struct Session {
    key: ChannelKey,
    config: ChannelConfig,
    description: SessionDescription,
    state: SessionState,
    connection: Option<Box<dyn RecorderConnection>>,
}

impl Session {
    pub fn new(key: ChannelKey, config: ChannelConfig, description: SessionDescription) -> Self {
        Self {
            key,
            config,
            description,
            state: SessionState::Null,
            connection: None,
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn kind(&self) -> RecorderKind {
        self.key.entity.kind
    }

    pub fn version(&self) -> Ed137Version {
        self.config.version
    }

    /// True when there is no usable connection.
    pub fn is_closed(&self) -> bool {
        self.connection.as_ref().map_or(true, |c| c.is_closed())
    }

    /// True when a transition has to begin with [`Session::start`].
    pub fn needs_start(&self) -> bool {
        self.state <= SessionState::Start || self.state == SessionState::Disconnect || self.is_closed()
    }

    /// Whether captured audio is forwarded on this session.
    pub fn is_forwarding(&self) -> bool {
        match self.state {
            SessionState::Record => true,
            SessionState::Pause => self.kind() == RecorderKind::Phone,
            _ => false,
        }
    }

    /// Recorder URL for this channel's entity.
    pub fn url(&self, record: &CallRecord) -> Result<String, SessionError> {
        let address = self.config.address.trim();
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| SessionError::InvalidUrl(address.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(SessionError::InvalidUrl(address.to_string()));
        }
        Ok(format!(
            "rtsp://{}/{}/{}",
            address,
            record.vcs_user.to_lowercase(),
            self.kind().url_suffix(&self.key.entity.name)
        ))
    }

    /// Create a connection if none is usable and open it unless already
    /// started. Returns the recorder URL. A failed start leaves the session
    /// in `DISCONNECT`.
    pub async fn start(
        &mut self,
        connector: &dyn Connector,
        record: &CallRecord,
    ) -> Result<String, SessionError> {
        let url = match self.url(record) {
            Ok(url) => url,
            Err(e) => {
                self.state = SessionState::Disconnect;
                return Err(e);
            }
        };
        if self.state != SessionState::Start || self.is_closed() {
            let params = ConnectionParams::from(&self.config);
            self.connection = Some(connector.connect(&self.key, &params));
            self.state = SessionState::Null;
        }
        let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        if self.state != SessionState::Start {
            if let Err(e) = connection.start(&url).await {
                self.state = SessionState::Disconnect;
                return Err(e.into());
            }
            self.state = SessionState::Start;
        }
        Ok(url)
    }

    /// Announce the session description and attach its streams.
    pub async fn announce_and_attach(&mut self, url: &str) -> Result<(), SessionError> {
        let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        self.state = SessionState::Announce;
        connection.announce_and_setup(url, &self.description).await?;
        self.state = SessionState::Setup;
        Ok(())
    }

    /// Push the record, if this kind/version carries metadata updates.
    pub async fn set_parameter(
        &mut self,
        url: Option<&str>,
        record: &CallRecord,
    ) -> Result<(), SessionError> {
        let gated = matches!(
            self.kind(),
            RecorderKind::Phone | RecorderKind::Brief | RecorderKind::Ambient
        ) || self.version() == Ed137Version::C;
        if record.disabled || !gated {
            return Ok(());
        }
        let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        connection.set_parameter(url, &record.to_xml()).await?;
        Ok(())
    }

    /// Start or resume recording. A paused phone session resumes with a
    /// metadata update only.
    pub async fn record(&mut self, record: &CallRecord) -> Result<(), SessionError> {
        let body = record.to_xml();
        if self.kind() == RecorderKind::Phone && self.state == SessionState::Pause {
            let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
            connection.set_parameter(None, &body).await?;
        } else if matches!(self.state, SessionState::Setup | SessionState::Pause) {
            let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
            connection.record(&body).await?;
        } else if self.state != SessionState::Record {
            debug!("{} record ignored in state {:?}", self.key, self.state);
            return Ok(());
        }
        self.state = SessionState::Record;
        Ok(())
    }

    /// Pause recording. Phone sessions keep streaming and only push
    /// metadata.
    pub async fn pause(&mut self, record: &CallRecord) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Record | SessionState::Pause) {
            debug!("{} pause ignored in state {:?}", self.key, self.state);
            return Ok(());
        }
        let body = record.to_xml();
        let phone = self.kind() == RecorderKind::Phone;
        let recording = self.state == SessionState::Record;
        let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        if phone {
            connection.set_parameter(None, &body).await?;
        } else if recording {
            connection.pause(&body).await?;
        }
        self.state = SessionState::Pause;
        Ok(())
    }

    /// Close after the entity ended normally. Newest-version recorders get a
    /// last metadata update with the release cause first.
    pub async fn close_by_normal(&mut self, record: &mut CallRecord) {
        if !record.disabled && self.version() == Ed137Version::C {
            let cause = map_disconnect_cause(&record.sip_disconnect_cause, None);
            record.set_property(Property::DisconnectCause, cause.code().to_string());
            if let Some(connection) = self.connection.as_mut() {
                if let Err(e) = connection.set_parameter(None, &record.to_xml()).await {
                    warn!("{} error sending final SET_PARAMETER: {}", self.key, e);
                }
            }
        }
        self.close().await;
    }

    /// Close immediately. Safe to call repeatedly.
    pub async fn close_by_err(&mut self) {
        self.close().await;
    }

    async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.state = SessionState::Disconnect;
    }

    /// Write a batch of packets if this session is forwarding audio.
    /// Returns the number of packets written.
    pub async fn forward(&mut self, packets: &[Packet]) -> usize {
        if !self.is_forwarding() {
            return 0;
        }
        let Some(connection) = self.connection.as_mut() else {
            return 0;
        };
        let mut written = 0;
        for packet in packets {
            if let Err(e) = connection.write_packet(packet).await {
                debug!("{} error writing packet: {}", self.key, e);
                break;
            }
            written += 1;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EntityKey;

    fn session(kind: RecorderKind, version: Ed137Version) -> Session {
        let key = EntityKey::new("Op1", kind).channel(0);
        let config = ChannelConfig {
            address: "10.0.0.5:8554".to_string(),
            version,
            ..ChannelConfig::default()
        };
        Session::new(key, config, SessionDescription::default())
    }

    fn record() -> CallRecord {
        let mut record = CallRecord::new();
        record.vcs_user = "Pos1".to_string();
        record.set_property(Property::CallingNr, "1001");
        record
    }

    async fn recording(session: &mut Session, connector: &MemoryConnector) {
        let record = record();
        let url = session.start(connector, &record).await.unwrap();
        session.announce_and_attach(&url).await.unwrap();
        session.record(&record).await.unwrap();
        assert_eq!(session.state(), SessionState::Record);
    }

    #[tokio::test]
    async fn test_start_builds_url() {
        let connector = MemoryConnector::new();
        let mut session = session(RecorderKind::RadioTx, Ed137Version::C);
        let url = session.start(&connector, &record()).await.unwrap();
        assert_eq!(url, "rtsp://10.0.0.5:8554/pos1/op1_ptt");
        assert_eq!(session.state(), SessionState::Start);
        assert!(session.needs_start());

        session.start(&connector, &record()).await.unwrap();
        let names = connector.verb_names(session.key());
        assert_eq!(names, vec!["CONNECT", "START"]);
    }

    #[tokio::test]
    async fn test_failed_start_disconnects() {
        let connector = MemoryConnector::new();
        connector.fail("START", TransportError::BadStatus(503));
        let mut session = session(RecorderKind::Phone, Ed137Version::B);
        let err = session.start(&connector, &record()).await.unwrap_err();
        assert_eq!(err, SessionError::Transport(TransportError::BadStatus(503)));
        assert_eq!(session.state(), SessionState::Disconnect);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_address() {
        let connector = MemoryConnector::new();
        let mut session = Session::new(
            EntityKey::new("Op1", RecorderKind::Phone).channel(0),
            ChannelConfig {
                address: "no-port".to_string(),
                ..ChannelConfig::default()
            },
            SessionDescription::default(),
        );
        let err = session.start(&connector, &record()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_phone_pause_uses_set_parameter() {
        let connector = MemoryConnector::new();
        let mut session = session(RecorderKind::Phone, Ed137Version::B);
        recording(&mut session, &connector).await;

        session.pause(&record()).await.unwrap();
        assert_eq!(session.state(), SessionState::Pause);
        let names = connector.verb_names(session.key());
        assert!(!names.contains(&"PAUSE"));
        assert_eq!(names.last(), Some(&"SET_PARAMETER"));
        assert!(session.is_forwarding());

        session.record(&record()).await.unwrap();
        let names = connector.verb_names(session.key());
        assert_eq!(names.iter().filter(|n| **n == "RECORD").count(), 1);
        assert_eq!(names.last(), Some(&"SET_PARAMETER"));
    }

    #[tokio::test]
    async fn test_radio_pause_emits_one_pause_verb() {
        let connector = MemoryConnector::new();
        let mut session = session(RecorderKind::RadioRx, Ed137Version::B);
        recording(&mut session, &connector).await;

        session.pause(&record()).await.unwrap();
        session.pause(&record()).await.unwrap();
        let names = connector.verb_names(session.key());
        assert_eq!(names.iter().filter(|n| **n == "PAUSE").count(), 1);
        assert!(!names.contains(&"SET_PARAMETER"));
        assert!(!session.is_forwarding());
    }

    #[tokio::test]
    async fn test_set_parameter_is_gated() {
        let connector = MemoryConnector::new();
        let mut radio_b = session(RecorderKind::RadioTx, Ed137Version::B);
        let url = radio_b.start(&connector, &record()).await.unwrap();
        radio_b.set_parameter(Some(&url), &record()).await.unwrap();
        assert!(!connector.verb_names(radio_b.key()).contains(&"SET_PARAMETER"));

        let mut brief = session(RecorderKind::Brief, Ed137Version::B);
        let url = brief.start(&connector, &record()).await.unwrap();
        brief.set_parameter(Some(&url), &record()).await.unwrap();
        assert!(connector.verb_names(brief.key()).contains(&"SET_PARAMETER"));

        let mut disabled = record();
        disabled.disabled = true;
        let mut phone = session(RecorderKind::Phone, Ed137Version::C);
        let url = phone.start(&connector, &disabled).await.unwrap();
        phone.set_parameter(Some(&url), &disabled).await.unwrap();
        assert!(!connector.verb_names(phone.key()).contains(&"SET_PARAMETER"));
    }

    #[tokio::test]
    async fn test_close_by_err_is_idempotent() {
        let connector = MemoryConnector::new();
        let mut session = session(RecorderKind::Phone, Ed137Version::B);
        recording(&mut session, &connector).await;

        session.close_by_err().await;
        assert_eq!(session.state(), SessionState::Disconnect);
        session.close_by_err().await;
        assert_eq!(session.state(), SessionState::Disconnect);
        let closes = connector
            .verb_names(session.key())
            .into_iter()
            .filter(|n| *n == "CLOSE")
            .count();
        assert_eq!(closes, 1);
        assert!(session.needs_start());
    }

    #[tokio::test]
    async fn test_close_by_normal_pushes_cause_on_newest_version() {
        let connector = MemoryConnector::new();
        let mut session = session(RecorderKind::RadioTx, Ed137Version::C);
        recording(&mut session, &connector).await;

        let mut record = record();
        record.sip_disconnect_cause = "486".to_string();
        session.close_by_normal(&mut record).await;
        assert_eq!(record.property(Property::DisconnectCause), "17");
        assert_eq!(session.state(), SessionState::Disconnect);

        let verbs = connector.verbs();
        let last_two: Vec<&str> = verbs.iter().rev().take(2).map(|(_, v)| v.name()).collect();
        assert_eq!(last_two, vec!["CLOSE", "SET_PARAMETER"]);
    }

    #[tokio::test]
    async fn test_close_by_normal_closes_even_when_push_fails() {
        let connector = MemoryConnector::new();
        let mut session = session(RecorderKind::Phone, Ed137Version::C);
        recording(&mut session, &connector).await;

        connector.fail("SET_PARAMETER", TransportError::Timeout);
        session.close_by_normal(&mut record()).await;
        assert_eq!(session.state(), SessionState::Disconnect);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_forward_only_while_recording() {
        let connector = MemoryConnector::new();
        let mut session = session(RecorderKind::RadioRx, Ed137Version::B);
        let packet = Packet::default();
        assert_eq!(session.forward(&[packet.clone()]).await, 0);

        recording(&mut session, &connector).await;
        assert_eq!(session.forward(&[packet.clone(), packet]).await, 2);
        assert_eq!(connector.packets(session.key()).len(), 2);
    }
}
