//! RIFF/WEBP container probe
//!
//! Walks the RIFF sub-chunks until one of `VP8X`, `VP8 ` or `VP8L` yields
//! dimensions. Odd-sized chunk payloads are followed by one padding byte.

use super::{read_u16_le, read_u24_le, read_u32_le, Probe};
use crate::protocol::MimeType;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

/// VP8X flags bit for an animated image
const ANIMATION_FLAG: u8 = 0x02;

/// Frame tag start code of a lossy keyframe
const VP8_START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// First byte of a lossless bitstream
const VP8L_SIGNATURE: u8 = 0x2f;

pub(super) fn probe(bytes: &[u8]) -> Option<Probe> {
    if bytes.len() < RIFF_HEADER_LEN || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WEBP" {
        return None;
    }

    let mut offset = RIFF_HEADER_LEN;
    while offset + CHUNK_HEADER_LEN <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size = read_u32_le(bytes, offset + 4)? as usize;
        let payload_start = offset + CHUNK_HEADER_LEN;
        let payload_end = payload_start.checked_add(chunk_size)?;
        if payload_end > bytes.len() {
            break;
        }
        let payload = &bytes[payload_start..payload_end];

        let found = match chunk_id {
            b"VP8X" => parse_vp8x(payload),
            b"VP8 " => parse_vp8(payload).map(|(w, h)| (w, h, false)),
            b"VP8L" => parse_vp8l(payload).map(|(w, h)| (w, h, false)),
            _ => None,
        };
        if let Some((width, height, animated)) = found {
            return Some(Probe {
                mime: MimeType::Webp,
                width,
                height,
                animated,
                loop_hint: animated,
            });
        }

        offset = payload_end + (chunk_size % 2);
    }

    None
}

fn parse_vp8x(payload: &[u8]) -> Option<(u32, u32, bool)> {
    if payload.len() < 10 {
        return None;
    }
    let animated = payload[0] & ANIMATION_FLAG == ANIMATION_FLAG;
    let width = read_u24_le(payload, 4)? + 1;
    let height = read_u24_le(payload, 7)? + 1;
    Some((width, height, animated))
}

fn parse_vp8(payload: &[u8]) -> Option<(u32, u32)> {
    if payload.len() < 10 || payload[3..6] != VP8_START_CODE {
        return None;
    }
    let width = read_u16_le(payload, 6)? & 0x3fff;
    let height = read_u16_le(payload, 8)? & 0x3fff;
    Some((u32::from(width), u32::from(height)))
}

fn parse_vp8l(payload: &[u8]) -> Option<(u32, u32)> {
    if payload.len() < 5 || payload[0] != VP8L_SIGNATURE {
        return None;
    }
    // 14-bit width-1 then 14-bit height-1, packed little-endian after the signature
    let (b1, b2, b3, b4) = (
        u32::from(payload[1]),
        u32::from(payload[2]),
        u32::from(payload[3]),
        u32::from(payload[4]),
    );
    let width = 1 + (((b2 & 0x3f) << 8) | b1);
    let height = 1 + (((b4 & 0x0f) << 10) | (b3 << 2) | ((b2 & 0xc0) >> 6));
    Some((width, height))
}
