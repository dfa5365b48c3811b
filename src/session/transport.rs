//! The recorder transport capability consumed by sessions.
//!
//! Framing of the streaming protocol itself lives behind
//! [`RecorderConnection`]; this crate only drives the verbs in order.

use async_trait::async_trait;
use parking_lot::Mutex;
use rtp::packet::Packet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ChannelConfig, Ed137Version, SessionDescription, Transport};
use crate::protocol::ChannelKey;

/// Failure reported by a recorder connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Recorder answered with a non-success status
    #[error("bad status code: {0}")]
    BadStatus(u16),

    /// No answer within the transport's deadline
    #[error("request timed out")]
    Timeout,

    /// Connection already closed
    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            TransportError::Timeout
        } else {
            TransportError::Io(e.to_string())
        }
    }
}

/// Parameters a connection is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub transport: Transport,
    pub keep_alive: Duration,
    pub interleaved: bool,
    pub version: Ed137Version,
}

impl From<&ChannelConfig> for ConnectionParams {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            transport: config.transport,
            keep_alive: config.keep_alive,
            interleaved: config.interleaved,
            version: config.version,
        }
    }
}

/// One client connection to a recorder.
#[async_trait]
pub trait RecorderConnection: Send {
    /// Open the connection to the host named in `url`.
    async fn start(&mut self, url: &str) -> Result<(), TransportError>;

    /// Announce the session description and set up all of its streams.
    async fn announce_and_setup(
        &mut self,
        url: &str,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;

    async fn set_parameter(&mut self, url: Option<&str>, body: &str) -> Result<(), TransportError>;

    async fn record(&mut self, body: &str) -> Result<(), TransportError>;

    async fn pause(&mut self, body: &str) -> Result<(), TransportError>;

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError>;

    async fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Creates connections for sessions.
pub trait Connector: Send + Sync {
    fn connect(&self, key: &ChannelKey, params: &ConnectionParams) -> Box<dyn RecorderConnection>;
}

/// Connector whose connections perform no I/O and log every verb.
#[derive(Debug, Default, Clone)]
pub struct LoggingConnector;

impl Connector for LoggingConnector {
    fn connect(&self, key: &ChannelKey, params: &ConnectionParams) -> Box<dyn RecorderConnection> {
        info!(
            "New recorder connection for {} ({}, {}, keep-alive {}s)",
            key,
            params.transport,
            params.version.recorder_tag(),
            params.keep_alive.as_secs()
        );
        Box::new(LoggingConnection {
            key: key.clone(),
            closed: false,
        })
    }
}

struct LoggingConnection {
    key: ChannelKey,
    closed: bool,
}

#[async_trait]
impl RecorderConnection for LoggingConnection {
    async fn start(&mut self, url: &str) -> Result<(), TransportError> {
        info!("{} START {}", self.key, url);
        self.closed = false;
        Ok(())
    }

    async fn announce_and_setup(
        &mut self,
        url: &str,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        info!("{} ANNOUNCE/SETUP {} ({})", self.key, url, description.encoding);
        Ok(())
    }

    async fn set_parameter(&mut self, url: Option<&str>, body: &str) -> Result<(), TransportError> {
        info!("{} SET_PARAMETER {}\n{}", self.key, url.unwrap_or("*"), body);
        Ok(())
    }

    async fn record(&mut self, body: &str) -> Result<(), TransportError> {
        info!("{} RECORD\n{}", self.key, body);
        Ok(())
    }

    async fn pause(&mut self, body: &str) -> Result<(), TransportError> {
        info!("{} PAUSE\n{}", self.key, body);
        Ok(())
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        debug!(
            "{} RTP seq={} ts={} pt={} len={}",
            self.key,
            packet.header.sequence_number,
            packet.header.timestamp,
            packet.header.payload_type,
            packet.payload.len()
        );
        Ok(())
    }

    async fn close(&mut self) {
        info!("{} TEARDOWN", self.key);
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A verb issued on a connection, as seen by [`MemoryConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Connect,
    Start { url: String },
    AnnounceSetup,
    SetParameter { body: String },
    Record { body: String },
    Pause { body: String },
    Packet { sequence: u16, timestamp: u32 },
    Close,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Connect => "CONNECT",
            Verb::Start { .. } => "START",
            Verb::AnnounceSetup => "ANNOUNCE",
            Verb::SetParameter { .. } => "SET_PARAMETER",
            Verb::Record { .. } => "RECORD",
            Verb::Pause { .. } => "PAUSE",
            Verb::Packet { .. } => "PACKET",
            Verb::Close => "CLOSE",
        }
    }
}

/// In-memory connector that records every verb per channel and can be told
/// to fail a given verb.
#[derive(Debug, Default, Clone)]
pub struct MemoryConnector {
    log: Arc<Mutex<Vec<(ChannelKey, Verb)>>>,
    failures: Arc<Mutex<Vec<(&'static str, TransportError)>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every future call of the verb with this name.
    pub fn fail(&self, verb: &'static str, error: TransportError) {
        self.failures.lock().push((verb, error));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn verbs(&self) -> Vec<(ChannelKey, Verb)> {
        self.log.lock().clone()
    }

    /// Verb names issued on one channel, packets excluded.
    pub fn verb_names(&self, key: &ChannelKey) -> Vec<&'static str> {
        self.log
            .lock()
            .iter()
            .filter(|(k, v)| k == key && !matches!(v, Verb::Packet { .. }))
            .map(|(_, v)| v.name())
            .collect()
    }

    pub fn packets(&self, key: &ChannelKey) -> Vec<(u16, u32)> {
        self.log
            .lock()
            .iter()
            .filter_map(|(k, v)| match v {
                Verb::Packet {
                    sequence,
                    timestamp,
                } if k == key => Some((*sequence, *timestamp)),
                _ => None,
            })
            .collect()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, key: &ChannelKey, _params: &ConnectionParams) -> Box<dyn RecorderConnection> {
        self.log.lock().push((key.clone(), Verb::Connect));
        Box::new(MemoryConnection {
            key: key.clone(),
            log: self.log.clone(),
            failures: self.failures.clone(),
            closed: false,
        })
    }
}

struct MemoryConnection {
    key: ChannelKey,
    log: Arc<Mutex<Vec<(ChannelKey, Verb)>>>,
    failures: Arc<Mutex<Vec<(&'static str, TransportError)>>>,
    closed: bool,
}

impl MemoryConnection {
    fn issue(&mut self, verb: Verb) -> Result<(), TransportError> {
        let name = verb.name();
        self.log.lock().push((self.key.clone(), verb));
        match self.failures.lock().iter().find(|(v, _)| *v == name) {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecorderConnection for MemoryConnection {
    async fn start(&mut self, url: &str) -> Result<(), TransportError> {
        self.issue(Verb::Start {
            url: url.to_string(),
        })
    }

    async fn announce_and_setup(
        &mut self,
        _url: &str,
        _description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.issue(Verb::AnnounceSetup)
    }

    async fn set_parameter(&mut self, _url: Option<&str>, body: &str) -> Result<(), TransportError> {
        self.issue(Verb::SetParameter {
            body: body.to_string(),
        })
    }

    async fn record(&mut self, body: &str) -> Result<(), TransportError> {
        self.issue(Verb::Record {
            body: body.to_string(),
        })
    }

    async fn pause(&mut self, body: &str) -> Result<(), TransportError> {
        self.issue(Verb::Pause {
            body: body.to_string(),
        })
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.issue(Verb::Packet {
            sequence: packet.header.sequence_number,
            timestamp: packet.header.timestamp,
        })
    }

    async fn close(&mut self) {
        if !self.closed {
            self.log.lock().push((self.key.clone(), Verb::Close));
        }
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
