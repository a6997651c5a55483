//! GIF logical screen descriptor probe

use super::{contains, read_u16_le, Probe};
use crate::protocol::MimeType;

const NETSCAPE: &[u8] = b"NETSCAPE2.0";
const ANIMEXTS: &[u8] = b"ANIMEXTS1.0";

pub(super) fn probe(bytes: &[u8]) -> Option<Probe> {
    let signature = bytes.get(..6)?;
    if signature != b"GIF87a" && signature != b"GIF89a" {
        return None;
    }
    let width = read_u16_le(bytes, 6)?;
    let height = read_u16_le(bytes, 8)?;
    // Application extensions that carry a loop count only appear in animations
    let animated = contains(bytes, NETSCAPE) || contains(bytes, ANIMEXTS);
    Some(Probe {
        mime: MimeType::Gif,
        width: u32::from(width),
        height: u32::from(height),
        animated,
        loop_hint: animated,
    })
}
