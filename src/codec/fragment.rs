//! Fragment encoding and reassembly for assets larger than one record

use std::collections::BTreeMap;

use crate::checksum::Checksum;
use crate::encoding;
use crate::error::{HivemojiError, Result};

/// Bounds for splitting and reassembling one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLimits {
    /// Raw bytes per fragment
    pub max_fragment_bytes: usize,
    /// Fragments per asset
    pub max_fragments: u32,
    /// Raw bytes per asset
    pub max_total_bytes: usize,
    /// Largest base64 encoding that still fits in a single record
    pub inline_ceiling: usize,
}

/// One piece of an asset, `seq` in `0..total`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub seq: u32,
    pub total: u32,
    /// Digest of the whole unsplit buffer; absent on a single inline fragment
    pub checksum: Option<Checksum>,
    pub data: Vec<u8>,
}

impl Fragment {
    /// True when this fragment carries the complete asset inline
    pub fn is_terminal(&self) -> bool {
        self.total == 1 && self.checksum.is_none()
    }
}

/// Encode a buffer as one inline fragment when it fits a single record,
/// otherwise as checksummed fragments.
pub fn encode(bytes: &[u8], limits: &FragmentLimits) -> Result<Vec<Fragment>> {
    check_total(bytes, limits)?;
    if encoding::encoded_len(bytes.len()) <= limits.inline_ceiling {
        return Ok(vec![Fragment {
            seq: 0,
            total: 1,
            checksum: None,
            data: bytes.to_vec(),
        }]);
    }
    split(bytes, limits)
}

/// Always produce the chunked form, even when one fragment would do
pub fn split(bytes: &[u8], limits: &FragmentLimits) -> Result<Vec<Fragment>> {
    check_total(bytes, limits)?;
    if limits.max_fragment_bytes == 0 {
        return Err(HivemojiError::Validation(
            "fragment size must be positive".to_string(),
        ));
    }

    let needed = bytes.len().div_ceil(limits.max_fragment_bytes);
    if needed > limits.max_fragments as usize {
        return Err(HivemojiError::TooLarge(format!(
            "requires {} chunks (> {})",
            needed, limits.max_fragments
        )));
    }
    let total = needed as u32;

    let checksum = Checksum::from_bytes(bytes);
    Ok(bytes
        .chunks(limits.max_fragment_bytes)
        .enumerate()
        .map(|(seq, data)| Fragment {
            seq: seq as u32,
            total,
            checksum: Some(checksum.clone()),
            data: data.to_vec(),
        })
        .collect())
}

/// Concatenate fragments by ascending `seq` and verify the declared digest.
///
/// Every seq in `0..total` must be present. A missing checksum is accepted
/// so producers that omit it stay readable.
pub fn reassemble<'a, I>(
    total: u32,
    fragments: I,
    checksum: Option<&Checksum>,
    max_total_bytes: usize,
) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (u32, &'a [u8])>,
{
    let by_seq: BTreeMap<u32, &[u8]> = fragments.into_iter().collect();

    let mut buffer = Vec::new();
    for seq in 0..total {
        let piece = by_seq
            .get(&seq)
            .ok_or(HivemojiError::Incomplete { missing: seq, total })?;
        if buffer.len() + piece.len() > max_total_bytes {
            return Err(HivemojiError::TooLarge(format!(
                "reassembled asset exceeds {} bytes",
                max_total_bytes
            )));
        }
        buffer.extend_from_slice(piece);
    }

    if let Some(expected) = checksum {
        if !expected.verify(&buffer) {
            return Err(HivemojiError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: Checksum::from_bytes(&buffer).to_string(),
            });
        }
    }

    Ok(buffer)
}

fn check_total(bytes: &[u8], limits: &FragmentLimits) -> Result<()> {
    if bytes.is_empty() {
        return Err(HivemojiError::Validation("image buffer is empty".to_string()));
    }
    if bytes.len() > limits.max_total_bytes {
        return Err(HivemojiError::TooLarge(format!(
            "{} bytes (> {})",
            bytes.len(),
            limits.max_total_bytes
        )));
    }
    Ok(())
}
