//! Audio path of an entity: capture from the local listen socket, repair
//! receive-radio numbering, convert to the recorder codec and fan the batch
//! out to every channel that is currently forwarding.

pub mod capture;
pub mod codec;
pub mod merge;

pub use capture::{is_rtp, Capture};
pub use codec::convert;
pub use merge::RxMerger;

use futures::future::{self, join_all};
use rtp::packet::Packet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::actor::EntityActor;
use crate::config::Codec;
use crate::protocol::{EntityKey, RecorderKind};
use crate::registry::Registry;

/// Forwarding loop of one entity.
pub struct AudioPipeline {
    key: EntityKey,
    actor: Arc<EntityActor>,
    registry: Arc<Registry>,
    forwarding: watch::Receiver<bool>,
    listen_port: watch::Receiver<u16>,
    done: CancellationToken,
}

impl AudioPipeline {
    pub fn new(actor: Arc<EntityActor>, registry: Arc<Registry>) -> Self {
        Self {
            key: actor.key().clone(),
            forwarding: actor.subscribe_forwarding(),
            listen_port: actor.subscribe_listen_port(),
            done: actor.done_token(),
            actor,
            registry,
        }
    }

    /// Run until the entity is done. Returns the number of packets written.
    pub async fn run(mut self) -> u64 {
        let settings = self.registry.settings().clone();
        let mut capture = Capture::new(settings.listen_host.clone());
        let mut merger = RxMerger::new();
        let mut ticker: Option<Interval> = None;
        let mut forwarded = 0u64;

        let port = *self.listen_port.borrow_and_update();
        if port != 0 {
            if let Err(e) = capture.rebind(port).await {
                warn!("{} could not bind capture port {}: {}", self.key, port, e);
            }
        }

        loop {
            tokio::select! {
                _ = self.done.cancelled() => break,

                changed = self.listen_port.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let port = *self.listen_port.borrow_and_update();
                    match capture.rebind(port).await {
                        Ok(()) => debug!("{} listen port updated to {}", self.key, port),
                        Err(e) => warn!("{} could not bind capture port {}: {}", self.key, port, e),
                    }
                }

                changed = self.forwarding.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let on = *self.forwarding.borrow_and_update();
                    if on {
                        let mut tick = interval(settings.poll_interval);
                        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker = Some(tick);
                        merger = RxMerger::new();
                    } else {
                        ticker = None;
                    }
                    debug!("{} forwarding {}", self.key, if on { "on" } else { "off" });
                }

                _ = next_tick(&mut ticker) => {
                    if !self.registry.any_forwarding(&self.key).await {
                        continue;
                    }
                    let batch = capture.read_batch(settings.read_window).await;
                    if batch.is_empty() {
                        continue;
                    }
                    let codec = self.registry.topology().codec.clone();
                    let batch = prepare(self.key.kind, batch, &mut merger, &codec);
                    let written = forward(&self.registry, &self.key, &batch).await as u64;
                    self.actor.record_forwarded(written);
                    forwarded += written;
                }
            }
        }
        forwarded
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(tick) => {
            tick.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

/// Merge (receive radios only) and convert a captured batch. Packets that
/// cannot be converted are dropped.
pub fn prepare(
    kind: RecorderKind,
    batch: Vec<Packet>,
    merger: &mut RxMerger,
    codec: &Codec,
) -> Vec<Packet> {
    let batch = if kind == RecorderKind::RadioRx {
        merger.merge(batch)
    } else {
        batch
    };
    batch
        .into_iter()
        .filter_map(|mut packet| convert(&mut packet, codec).then_some(packet))
        .collect()
}

/// Write a batch to every session of the entity, concurrently. Returns the
/// total number of packets written.
pub async fn forward(registry: &Registry, key: &EntityKey, batch: &[Packet]) -> usize {
    let sessions = registry.sessions_of(key);
    let writes = sessions.iter().map(|session| async move {
        let mut session = session.lock().await;
        session.forward(batch).await
    });
    join_all(writes).await.into_iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(seq: u16, ts: u32, pt: u8) -> Packet {
        let mut packet = Packet::default();
        packet.header.version = 2;
        packet.header.ssrc = 5;
        packet.header.payload_type = pt;
        packet.header.sequence_number = seq;
        packet.header.timestamp = ts;
        packet.payload = Bytes::from(vec![0xD5u8; 160]);
        packet
    }

    #[test]
    fn test_prepare_merges_only_receive_radios() {
        let batch = vec![packet(1, 160, 8), packet(50, 160, 8)];

        let mut merger = RxMerger::new();
        let out = prepare(RecorderKind::RadioRx, batch.clone(), &mut merger, &Codec::Alaw);
        let seqs: Vec<u16> = out.iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2]);

        let mut merger = RxMerger::new();
        let out = prepare(RecorderKind::RadioTx, batch, &mut merger, &Codec::Alaw);
        let seqs: Vec<u16> = out.iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs, vec![1, 50]);
    }

    #[test]
    fn test_prepare_drops_unconvertible() {
        let batch = vec![packet(1, 160, 8), packet(2, 320, 18), packet(3, 480, 0)];
        let mut merger = RxMerger::new();
        let out = prepare(RecorderKind::Phone, batch, &mut merger, &Codec::Alaw);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|p| p.header.payload_type == 8));
    }
}
