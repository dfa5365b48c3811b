//! G.711 companding and payload conversion towards the recorder codec.

use bytes::Bytes;
use rtp::packet::Packet;

use crate::config::Codec;

/// Static payload type of μ-law audio
pub const PT_PCMU: u8 = 0;
/// Static payload type of A-law audio
pub const PT_PCMA: u8 = 8;
/// Dynamic payload type carrying 16-bit little-endian linear PCM
pub const PT_LINEAR: u8 = 96;

const SIGN_BIT: u8 = 0x80;
const QUANT_MASK: u8 = 0x0F;
const SEG_SHIFT: u8 = 4;
const SEG_MASK: u8 = 0x70;
const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 8159;

const SEG_AEND: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];
const SEG_UEND: [i32; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

fn segment(value: i32, table: &[i32; 8]) -> Option<usize> {
    table.iter().position(|&end| value <= end)
}

pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample) >> 3;
    let mask: i32 = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };
    match segment(pcm, &SEG_AEND) {
        None => (0x7F ^ mask) as u8,
        Some(seg) => {
            let shift = if seg < 2 { 1 } else { seg };
            let aval = ((seg as i32) << SEG_SHIFT) | ((pcm >> shift) & i32::from(QUANT_MASK));
            (aval ^ mask) as u8
        }
    }
}

pub fn alaw_to_linear(code: u8) -> i16 {
    let a = code ^ 0x55;
    let mut t = i32::from(a & QUANT_MASK) << 4;
    let seg = (a & SEG_MASK) >> SEG_SHIFT;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a & SIGN_BIT != 0 {
        t as i16
    } else {
        -t as i16
    }
}

pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample) >> 2;
    let mask: i32 = if pcm < 0 {
        pcm = -pcm;
        0x7F
    } else {
        0xFF
    };
    pcm = pcm.min(ULAW_CLIP) + (ULAW_BIAS >> 2);
    match segment(pcm, &SEG_UEND) {
        None => (0x7F ^ mask) as u8,
        Some(seg) => {
            let uval = ((seg as i32) << SEG_SHIFT) | ((pcm >> (seg + 1)) & i32::from(QUANT_MASK));
            (uval ^ mask) as u8
        }
    }
}

pub fn ulaw_to_linear(code: u8) -> i16 {
    let u = !code;
    let mut t = (i32::from(u & QUANT_MASK) << 3) + ULAW_BIAS;
    t <<= (u & SEG_MASK) >> SEG_SHIFT;
    if u & SIGN_BIT != 0 {
        (ULAW_BIAS - t) as i16
    } else {
        (t - ULAW_BIAS) as i16
    }
}

fn encode_linear(payload: &[u8], encode: fn(i16) -> u8) -> Vec<u8> {
    payload
        .chunks_exact(2)
        .map(|pair| encode(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Rewrite `packet` into the recorder codec. Returns `false` when the packet
/// has to be dropped: unknown source payload type or unsupported target.
pub fn convert(packet: &mut Packet, target: &Codec) -> bool {
    let Some(target_pt) = target.payload_type() else {
        return false;
    };
    let source_pt = packet.header.payload_type;
    if !matches!(source_pt, PT_PCMU | PT_PCMA | PT_LINEAR) {
        return false;
    }
    if source_pt == target_pt {
        return true;
    }

    let payload: Vec<u8> = match (source_pt, target_pt) {
        (PT_LINEAR, PT_PCMA) => encode_linear(&packet.payload, linear_to_alaw),
        (PT_LINEAR, _) => encode_linear(&packet.payload, linear_to_ulaw),
        (PT_PCMU, _) => packet
            .payload
            .iter()
            .map(|&u| linear_to_alaw(ulaw_to_linear(u)))
            .collect(),
        _ => packet
            .payload
            .iter()
            .map(|&a| linear_to_ulaw(alaw_to_linear(a)))
            .collect(),
    };
    packet.payload = Bytes::from(payload);
    packet.header.payload_type = target_pt;
    true
}
