use bytes::Bytes;
use rtp::packet::Packet;
use std::io;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use webrtc_util::marshal::Unmarshal;

const MAX_DATAGRAM: usize = 1024;
const RTP_HEADER_LEN: usize = 12;

/// Minimal header sanity check: long enough for a fixed header and version 2.
pub fn is_rtp(buf: &[u8]) -> bool {
    buf.len() >= RTP_HEADER_LEN && buf[0] >> 6 == 2
}

/// Per-entity UDP receive point for captured audio.
pub struct Capture {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
}

impl Capture {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 0,
            socket: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Rebind to a new listen port. The previous socket is dropped first.
    pub async fn rebind(&mut self, port: u16) -> io::Result<()> {
        self.socket = None;
        self.port = port;
        if port == 0 {
            return Ok(());
        }
        let socket = UdpSocket::bind((self.host.as_str(), port)).await?;
        debug!("Capture bound to {}:{}", self.host, port);
        self.socket = Some(socket);
        Ok(())
    }

    /// Read every datagram that arrives within `window`. Malformed,
    /// zero-timestamp and empty packets are dropped one by one.
    pub async fn read_batch(&mut self, window: Duration) -> Vec<Packet> {
        let mut packets = Vec::new();
        if self.socket.is_none() && self.port != 0 {
            if let Err(e) = self.rebind(self.port).await {
                warn!("Could not bind capture port {}: {}", self.port, e);
                return packets;
            }
        }
        let Some(socket) = self.socket.as_ref() else {
            return packets;
        };

        let deadline = Instant::now() + window;
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let n = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, _))) => n,
                Ok(Err(e)) => {
                    debug!("Capture read error on port {}: {}", self.port, e);
                    break;
                }
                Err(_) => break,
            };
            let datagram = &buf[..n];
            if !is_rtp(datagram) {
                debug!("Dropping {} byte non-RTP datagram", n);
                continue;
            }
            let mut raw = Bytes::copy_from_slice(datagram);
            let packet = match Packet::unmarshal(&mut raw) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Dropping malformed RTP packet: {}", e);
                    continue;
                }
            };
            if packet.header.timestamp == 0 || packet.payload.is_empty() {
                continue;
            }
            packets.push(packet);
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc_util::marshal::Marshal;

    fn datagram(seq: u16, ts: u32, payload: &[u8]) -> Vec<u8> {
        let mut packet = Packet::default();
        packet.header.version = 2;
        packet.header.payload_type = 8;
        packet.header.sequence_number = seq;
        packet.header.timestamp = ts;
        packet.header.ssrc = 42;
        packet.payload = Bytes::copy_from_slice(payload);
        packet.marshal().unwrap().to_vec()
    }

    #[test]
    fn test_is_rtp() {
        assert!(!is_rtp(&[0x80; 4]));
        assert!(is_rtp(&[0x80; 12]));
        assert!(!is_rtp(&[0x40; 12]));
    }

    #[tokio::test]
    async fn test_read_batch_filters_packets() {
        let mut capture = Capture::new("127.0.0.1");
        let reserved = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = reserved.local_addr().unwrap().port();
        drop(reserved);
        capture.rebind(port).await.unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = ("127.0.0.1", port);
        sender.send_to(&datagram(1, 160, &[1, 2, 3]), target).await.unwrap();
        sender.send_to(&datagram(2, 0, &[1, 2, 3]), target).await.unwrap();
        sender.send_to(&datagram(3, 480, &[4, 5, 6]), target).await.unwrap();
        sender.send_to(&datagram(4, 560, &[]), target).await.unwrap();
        sender.send_to(&[0u8; 20], target).await.unwrap();
        sender.send_to(&[0x80, 0x08], target).await.unwrap();
        sender.send_to(&datagram(5, 640, &[7]), target).await.unwrap();

        // garbage in the middle of a pass does not hide the packets behind it
        let packets = capture.read_batch(Duration::from_millis(200)).await;
        let seqs: Vec<u16> = packets.iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_read_batch_without_port() {
        let mut capture = Capture::new("127.0.0.1");
        assert!(capture.read_batch(Duration::from_millis(5)).await.is_empty());
    }
}
