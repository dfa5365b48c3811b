//! Recorder topology and runtime settings.
//!
//! The topology (one entry per recording channel) is read from two text
//! sources, `rec.cfg` and `device_system.cfg`, each with an alternate path.
//! Runtime settings hold the timing constants of the actor and the capture
//! loop and can be overridden from the command line.

mod parse;

pub use parse::{parse_device_system, parse_rec_config, remove_comments};

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Streaming transport for RTP towards the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("tcp") {
            Transport::Tcp
        } else {
            Transport::Udp
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Udp => f.write_str("udp"),
        }
    }
}

/// ED-137 recorder interface version. `C` is the newest variant and unlocks
/// call references, call types and metadata pushes on every verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ed137Version {
    A,
    #[default]
    B,
    C,
}

impl Ed137Version {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ED137A" => Some(Ed137Version::A),
            "ED137B" => Some(Ed137Version::B),
            "ED137C" => Some(Ed137Version::C),
            _ => None,
        }
    }

    /// WG-67 recorder protocol tag announced to the recorder.
    pub fn recorder_tag(self) -> &'static str {
        match self {
            Ed137Version::A => "recorder.00",
            Ed137Version::B => "recorder.01",
            Ed137Version::C => "recorder.02",
        }
    }
}

impl fmt::Display for Ed137Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ed137Version::A => f.write_str("ED137A"),
            Ed137Version::B => f.write_str("ED137B"),
            Ed137Version::C => f.write_str("ED137C"),
        }
    }
}

/// Payload codec the recorder expects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Alaw,
    Ulaw,
    Unsupported(String),
}

impl Codec {
    pub fn parse(value: &str) -> Self {
        match value {
            "g711alaw" => Codec::Alaw,
            "g711ulaw" => Codec::Ulaw,
            other => Codec::Unsupported(other.to_string()),
        }
    }

    /// Static RTP payload type, if the codec is one we can produce.
    pub fn payload_type(&self) -> Option<u8> {
        match self {
            Codec::Alaw => Some(8),
            Codec::Ulaw => Some(0),
            Codec::Unsupported(_) => None,
        }
    }
}

/// Media announced to the recorder: a single audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub payload_type: u8,
    pub encoding: &'static str,
    pub clock_rate: u32,
}

impl SessionDescription {
    pub fn for_codec(codec: &Codec) -> Self {
        match codec {
            Codec::Ulaw => Self {
                payload_type: 0,
                encoding: "PCMU",
                clock_rate: 8000,
            },
            _ => Self {
                payload_type: 8,
                encoding: "PCMA",
                clock_rate: 8000,
            },
        }
    }

    pub fn to_sdp(&self) -> String {
        format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Stream\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\nm=audio 0 RTP/AVP {pt}\r\na=rtpmap:{pt} {enc}/{rate}\r\na=sendonly\r\n",
            pt = self.payload_type,
            enc = self.encoding,
            rate = self.clock_rate
        )
    }
}

impl Default for SessionDescription {
    fn default() -> Self {
        Self::for_codec(&Codec::Alaw)
    }
}

/// Per-channel recorder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// `host:port` of the recorder
    pub address: String,
    pub transport: Transport,
    pub keep_alive: Duration,
    pub version: Ed137Version,
    pub interleaved: bool,
    /// Group channels record group/ambient entities only
    pub group: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8554".to_string(),
            transport: Transport::Udp,
            keep_alive: Duration::from_secs(20),
            version: Ed137Version::B,
            interleaved: true,
            group: false,
        }
    }
}

/// Recording channel topology. Indices into `channels` are the channel
/// numbers used throughout the crate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Topology {
    pub channels: Vec<ChannelConfig>,
    pub codec: Codec,
    pub description: SessionDescription,
}

impl Topology {
    pub fn new(channels: Vec<ChannelConfig>, codec: Codec) -> Self {
        let description = SessionDescription::for_codec(&codec);
        Self {
            channels,
            codec,
            description,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn group_count(&self) -> usize {
        self.channels.iter().filter(|c| c.group).count()
    }

    pub fn non_group_count(&self) -> usize {
        self.channels.iter().filter(|c| !c.group).count()
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelConfig> {
        self.channels.get(index)
    }

    /// Build a topology from the two configuration texts. Either may be
    /// empty. Duplicate recorder addresses are merged afterwards.
    pub fn from_sources(rec_cfg: &str, device_system: &str) -> Self {
        let (mut channels, codec) = parse_rec_config(rec_cfg);
        channels.extend(parse_device_system(device_system));
        let mut topology = Topology::new(channels, codec);
        topology.dedup();
        topology
    }

    /// Keep one channel per recorder address, preferring the UDP entry.
    pub fn dedup(&mut self) {
        let mut kept: Vec<ChannelConfig> = Vec::with_capacity(self.channels.len());
        for channel in self.channels.drain(..) {
            match kept.iter_mut().find(|c| c.address == channel.address) {
                Some(existing) => {
                    if existing.transport != Transport::Udp && channel.transport == Transport::Udp {
                        *existing = channel;
                    }
                }
                None => kept.push(channel),
            }
        }
        self.channels = kept;
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Recorder topology: {} channel(s)", self.channels.len())?;
        for (i, c) in self.channels.iter().enumerate() {
            writeln!(
                f,
                "  ch{}: {} transport={} keep_alive={}s interleaved={} {} group={}",
                i,
                c.address,
                c.transport,
                c.keep_alive.as_secs(),
                c.interleaved,
                c.version,
                c.group
            )?;
        }
        write!(
            f,
            "  group channels: {}, non-group channels: {}",
            self.group_count(),
            self.non_group_count()
        )
    }
}

/// Locations of the configuration sources.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub rec_cfg: PathBuf,
    pub alt_rec_cfg: PathBuf,
    pub device_system: PathBuf,
    pub alt_device_system: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            rec_cfg: PathBuf::from("config/rec-config/rec.cfg"),
            alt_rec_cfg: PathBuf::from("/home/cwp/opconsole/config/rec-config/rec.cfg"),
            device_system: PathBuf::from("config/system/device_system.cfg"),
            alt_device_system: PathBuf::from("/home/cwp/opconsole/config/system/device_system.cfg"),
        }
    }
}

impl ConfigPaths {
    /// Read both sources, falling back to the alternate paths. Returns
    /// `None` when neither source could be read.
    pub async fn load(&self) -> Option<Topology> {
        let rec = read_with_fallback(&self.rec_cfg, &self.alt_rec_cfg).await;
        let dev = read_with_fallback(&self.device_system, &self.alt_device_system).await;
        if rec.is_none() && dev.is_none() {
            return None;
        }
        Some(Topology::from_sources(
            rec.as_deref().unwrap_or_default(),
            dev.as_deref().unwrap_or_default(),
        ))
    }
}

async fn read_source(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Could not load {}", path.display()))
}

async fn read_with_fallback(primary: &Path, alternate: &Path) -> Option<String> {
    match read_source(primary).await {
        Ok(text) => Some(text),
        Err(e) => {
            info!("{:#}", e);
            match read_source(alternate).await {
                Ok(text) => Some(text),
                Err(e) => {
                    info!("{:#}", e);
                    None
                }
            }
        }
    }
}

/// Timing and sizing of the actors and the capture loop.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Cadence of the audio forwarding loop while recording
    pub poll_interval: Duration,
    /// How long a single capture pass reads the socket
    pub read_window: Duration,
    /// Debounce delay of the dormancy sub-machine
    pub dormancy_delay: Duration,
    /// Upper bound on waiting for entities to drain during reload
    pub reload_timeout: Duration,
    pub reload_poll: Duration,
    /// Primary mailbox depth; radio entities get twice this
    pub mailbox_capacity: usize,
    /// Address the capture socket binds to
    pub listen_host: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            read_window: Duration::from_millis(30),
            dormancy_delay: Duration::from_secs(5),
            reload_timeout: Duration::from_secs(4),
            reload_poll: Duration::from_millis(50),
            mailbox_capacity: 10,
            listen_host: "127.0.0.1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn channel(address: &str, transport: Transport) -> ChannelConfig {
        ChannelConfig {
            address: address.to_string(),
            transport,
            ..ChannelConfig::default()
        }
    }

    #[test]
    fn test_dedup_prefers_udp() {
        let mut topology = Topology::new(
            vec![
                channel("10.0.0.1:8554", Transport::Tcp),
                channel("10.0.0.2:8554", Transport::Tcp),
                channel("10.0.0.1:8554", Transport::Udp),
                channel("10.0.0.2:8554", Transport::Tcp),
            ],
            Codec::Alaw,
        );
        topology.dedup();
        assert_eq!(topology.channel_count(), 2);
        assert_eq!(topology.channels[0].address, "10.0.0.1:8554");
        assert_eq!(topology.channels[0].transport, Transport::Udp);
        assert_eq!(topology.channels[1].transport, Transport::Tcp);
    }

    #[test]
    fn test_session_description_follows_codec() {
        let topology = Topology::new(Vec::new(), Codec::Ulaw);
        assert_eq!(topology.description.payload_type, 0);
        assert!(topology.description.to_sdp().contains("a=rtpmap:0 PCMU/8000"));
        assert_eq!(Codec::parse("g729").payload_type(), None);
        assert_eq!(Ed137Version::C.recorder_tag(), "recorder.02");
    }

    #[tokio::test]
    async fn test_load_uses_alternate_path() {
        let mut rec = NamedTempFile::new().unwrap();
        writeln!(rec, "rec_ip = 10.1.1.1\nrec_port = 9000\nrec_group = false").unwrap();

        let paths = ConfigPaths {
            rec_cfg: PathBuf::from("/nonexistent/rec.cfg"),
            alt_rec_cfg: rec.path().to_path_buf(),
            device_system: PathBuf::from("/nonexistent/device_system.cfg"),
            alt_device_system: PathBuf::from("/nonexistent/alt/device_system.cfg"),
        };
        let topology = paths.load().await.unwrap();
        assert_eq!(topology.channel_count(), 1);
        assert_eq!(topology.channels[0].address, "10.1.1.1:9000");
    }

    #[tokio::test]
    async fn test_load_without_sources() {
        let paths = ConfigPaths {
            rec_cfg: PathBuf::from("/nonexistent/a"),
            alt_rec_cfg: PathBuf::from("/nonexistent/b"),
            device_system: PathBuf::from("/nonexistent/c"),
            alt_device_system: PathBuf::from("/nonexistent/d"),
        };
        assert!(paths.load().await.is_none());
    }
}
