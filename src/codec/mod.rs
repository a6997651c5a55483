//! Image Codec
//!
//! Two halves:
//!
//! - **Sniffing**: identify PNG, GIF and WEBP containers from their signatures and
//!   pull out pixel dimensions plus an animation hint, without decoding pixels.
//! - **Fragments**: split an image buffer into bounded, checksummed pieces that fit
//!   ledger records, and reassemble them back with integrity verification.

mod fragment;
mod gif;
mod png;
mod webp;

pub use fragment::{encode, reassemble, split, Fragment, FragmentLimits};

use serde::{Deserialize, Serialize};

use crate::error::{HivemojiError, Result};
use crate::protocol::MimeType;

/// What sniffing learned about an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub mime: MimeType,
    pub width: u32,
    pub height: u32,
    /// The container advertises more than one frame
    pub animated: bool,
    /// The container advertises looping playback
    pub loop_hint: bool,
}

/// Container-level findings before dimension validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Probe {
    mime: MimeType,
    width: u32,
    height: u32,
    animated: bool,
    loop_hint: bool,
}

/// Identify an image and read its dimensions
pub fn sniff(bytes: &[u8]) -> Result<ImageInfo> {
    let probe = png::probe(bytes)
        .or_else(|| gif::probe(bytes))
        .or_else(|| webp::probe(bytes))
        .ok_or(HivemojiError::UnsupportedFormat)?;

    if probe.width == 0 || probe.height == 0 {
        return Err(HivemojiError::InvalidDimensions {
            width: u64::from(probe.width),
            height: u64::from(probe.height),
        });
    }

    Ok(ImageInfo {
        mime: probe.mime,
        width: probe.width,
        height: probe.height,
        animated: probe.animated,
        loop_hint: probe.loop_hint,
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn read_u16_le(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u24_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 3)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], 0]))
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_u32_be(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
