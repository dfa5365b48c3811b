use rtp::packet::Packet;

/// Sequence/timestamp repair for receive radios.
///
/// A squelch gap makes the radio gateway repeat the timestamp of the last
/// discontinuity or jump ahead with a fresh sequence. Packets are renumbered
/// so the recorder sees one continuous stream per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RxMerger {
    ssrc: u32,
    last_active_seq: u16,
    last_active_ts: u32,
    last_discontinuity_ts: u32,
    segment_len: usize,
}

impl RxMerger {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, packet: &Packet) {
        *self = Self {
            ssrc: packet.header.ssrc,
            segment_len: packet.payload.len(),
            ..Self::default()
        };
    }

    /// Renumber a captured batch in place order.
    pub fn merge(&mut self, packets: Vec<Packet>) -> Vec<Packet> {
        let mut merged = Vec::with_capacity(packets.len());
        for mut packet in packets {
            if packet.header.ssrc != self.ssrc || self.segment_len == 0 {
                self.reset(&packet);
            }
            if self.segment_len == 0 {
                continue;
            }
            let half_segment = (self.segment_len / 2) as u32;

            if self.last_discontinuity_ts == 0 {
                self.last_discontinuity_ts = packet.header.timestamp;
            } else if packet.header.timestamp == self.last_discontinuity_ts {
                packet.header.timestamp = self.last_active_ts.wrapping_add(half_segment);
                packet.header.sequence_number = self.last_active_seq.wrapping_add(1);
            } else {
                self.last_discontinuity_ts = packet.header.timestamp;
                if packet.header.sequence_number != self.last_active_seq.wrapping_add(1) {
                    let elapsed = packet.header.timestamp.wrapping_sub(self.last_active_ts);
                    let steps = elapsed.wrapping_mul(2) / self.segment_len as u32;
                    packet.header.sequence_number =
                        self.last_active_seq.wrapping_add(steps as u16);
                }
            }

            self.last_active_ts = packet.header.timestamp;
            self.last_active_seq = packet.header.sequence_number;
            let len = packet.payload.len();
            if len != 0 && len != self.segment_len {
                self.segment_len = len;
            }
            merged.push(packet);
        }
        merged
    }
}
