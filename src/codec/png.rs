//! PNG / APNG header probe

use super::{contains, read_u32_be, Probe};
use crate::protocol::MimeType;

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Width and height sit in the IHDR chunk, which must come first
const WIDTH_OFFSET: usize = 16;
const HEIGHT_OFFSET: usize = 20;

/// Animation control chunk; its presence marks an APNG
const ACTL: &[u8] = b"acTL";

pub(super) fn probe(bytes: &[u8]) -> Option<Probe> {
    if !bytes.starts_with(&SIGNATURE) {
        return None;
    }
    let width = read_u32_be(bytes, WIDTH_OFFSET)?;
    let height = read_u32_be(bytes, HEIGHT_OFFSET)?;
    let animated = contains(&bytes[SIGNATURE.len()..], ACTL);
    Some(Probe {
        mime: MimeType::Png,
        width,
        height,
        animated,
        loop_hint: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures;

    #[test]
    fn test_truncated_header_is_not_png() {
        let bytes = fixtures::png(10, 20, false);
        assert!(probe(&bytes[..18]).is_none());
    }
}
