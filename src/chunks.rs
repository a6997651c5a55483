//! Chunk Reassembly Engine
//!
//! Collects `ChunkV2` operations into groups keyed by `(upload id, kind)`.
//! When the log has been read, each group that holds every fragment is
//! reassembled and verified; the rest are discarded.

use std::collections::BTreeMap;

use tracing::debug;

use crate::checksum::Checksum;
use crate::codec;
use crate::operation::{ChunkOp, Sequence};
use crate::protocol::{ChunkKind, Limits, MimeType};

/// A fully reassembled image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedAsset {
    pub kind: ChunkKind,
    pub name: String,
    pub mime: MimeType,
    pub width: u32,
    pub height: u32,
    pub animated: Option<bool>,
    pub loop_: Option<bool>,
    pub data: Vec<u8>,
    /// Newest contributing operation
    pub sequence: Sequence,
}

/// Why a chunk was not added to its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRejected {
    /// Name, mime or dimensions differ from the group's first chunk
    MetadataMismatch,
}

#[derive(Debug, Clone)]
struct ChunkGroup {
    name: String,
    mime: MimeType,
    width: u32,
    height: u32,
    total: u32,
    fragments: BTreeMap<u32, Vec<u8>>,
    checksum: Option<Checksum>,
    animated: Option<bool>,
    loop_: Option<bool>,
    sequence: Sequence,
}

impl ChunkGroup {
    fn start(chunk: ChunkOp, sequence: Sequence) -> Self {
        let mut fragments = BTreeMap::new();
        fragments.insert(chunk.seq, chunk.data);
        Self {
            name: chunk.name,
            mime: chunk.mime,
            width: chunk.width,
            height: chunk.height,
            total: chunk.total,
            fragments,
            checksum: chunk.checksum,
            animated: chunk.animated,
            loop_: chunk.loop_,
            sequence,
        }
    }

    fn agrees_with(&self, chunk: &ChunkOp) -> bool {
        self.name == chunk.name
            && self.mime == chunk.mime
            && self.width == chunk.width
            && self.height == chunk.height
    }

    fn absorb(&mut self, chunk: ChunkOp, sequence: Sequence) {
        self.total = chunk.total;
        self.fragments.insert(chunk.seq, chunk.data);
        if chunk.checksum.is_some() {
            self.checksum = chunk.checksum;
        }
        if chunk.animated.is_some() {
            self.animated = chunk.animated;
        }
        if chunk.loop_.is_some() {
            self.loop_ = chunk.loop_;
        }
        self.sequence = self.sequence.max(sequence);
    }

    /// Distinct seqs equal `total` and cover `0..total`
    fn is_complete(&self) -> bool {
        self.fragments.len() == self.total as usize
            && (0..self.total).all(|seq| self.fragments.contains_key(&seq))
    }
}

/// Accumulates chunk groups over one fold
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    groups: BTreeMap<(String, ChunkKind), ChunkGroup>,
    max_total_bytes: usize,
}

impl ChunkAssembler {
    pub fn new(limits: &Limits) -> Self {
        Self {
            groups: BTreeMap::new(),
            max_total_bytes: limits.max_total_bytes,
        }
    }

    /// Number of groups seen so far
    pub fn pending(&self) -> usize {
        self.groups.len()
    }

    /// Add one chunk to its group
    pub fn accept(&mut self, chunk: ChunkOp, sequence: Sequence) -> Result<(), ChunkRejected> {
        let key = (chunk.id.clone(), chunk.kind);
        match self.groups.get_mut(&key) {
            Some(group) => {
                if !group.agrees_with(&chunk) {
                    debug!(id = %chunk.id, seq = chunk.seq, "chunk metadata disagrees with its group");
                    return Err(ChunkRejected::MetadataMismatch);
                }
                group.absorb(chunk, sequence);
            }
            None => {
                self.groups.insert(key, ChunkGroup::start(chunk, sequence));
            }
        }
        Ok(())
    }

    /// Reassemble every complete group, ordered by sequence.
    ///
    /// Incomplete, oversized or corrupted groups are dropped.
    pub fn finish(self) -> Vec<FinishedAsset> {
        let max_total_bytes = self.max_total_bytes;
        let mut assets: Vec<FinishedAsset> = self
            .groups
            .into_iter()
            .filter_map(|((id, kind), group)| {
                if !group.is_complete() {
                    debug!(%id, have = group.fragments.len(), total = group.total, "discarding incomplete chunk group");
                    return None;
                }
                let data = match codec::reassemble(
                    group.total,
                    group.fragments.iter().map(|(seq, data)| (*seq, data.as_slice())),
                    group.checksum.as_ref(),
                    max_total_bytes,
                ) {
                    Ok(data) => data,
                    Err(error) => {
                        debug!(%id, %error, "discarding chunk group");
                        return None;
                    }
                };
                Some(FinishedAsset {
                    kind,
                    name: group.name,
                    mime: group.mime,
                    width: group.width,
                    height: group.height,
                    animated: group.animated,
                    loop_: group.loop_,
                    data,
                    sequence: group.sequence,
                })
            })
            .collect();
        assets.sort_by_key(|asset| asset.sequence);
        assets
    }
}
