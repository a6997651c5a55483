//! Typed operations decoded from ledger records

use crate::checksum::Checksum;
use crate::protocol::{ChunkKind, MimeType};

/// Position of an operation within one owner's decoded stream.
///
/// Only compared for last-write-wins. Snapshots loaded from a cache carry
/// [`SEED_SEQUENCE`] so any freshly decoded operation supersedes them.
pub type Sequence = i64;

/// Sequence assigned to seed entries
pub const SEED_SEQUENCE: Sequence = -1;

/// Non-animated alternative carried inline by a register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineFallback {
    pub mime: MimeType,
    pub data: Vec<u8>,
}

/// Full single-shot definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOp {
    pub name: String,
    pub mime: MimeType,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub fallback: Option<InlineFallback>,
    pub animated: Option<bool>,
    pub loop_: Option<bool>,
}

/// One fragment of a chunked upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOp {
    pub id: String,
    pub kind: ChunkKind,
    pub name: String,
    pub mime: MimeType,
    pub width: u32,
    pub height: u32,
    pub seq: u32,
    pub total: u32,
    pub checksum: Option<Checksum>,
    pub data: Vec<u8>,
    pub animated: Option<bool>,
    pub loop_: Option<bool>,
}

/// Announcement that a chunked upload exists; may carry inline data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestOp {
    pub name: String,
    pub id: Option<String>,
    pub mime: Option<MimeType>,
    pub width: u32,
    pub height: u32,
    pub data: Option<Vec<u8>>,
    pub animated: Option<bool>,
    pub loop_: Option<bool>,
}

impl ManifestOp {
    /// A manifest with inline pixels acts as a full register
    pub fn into_register(self) -> Option<RegisterOp> {
        let data = self.data?;
        let mime = self.mime?;
        Some(RegisterOp {
            name: self.name,
            mime,
            width: self.width,
            height: self.height,
            data,
            fallback: None,
            animated: self.animated,
            loop_: self.loop_,
        })
    }
}

/// A decoded protocol operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    RegisterV1(RegisterOp),
    DeleteV1 { name: String },
    ChunkV2(ChunkOp),
    DeleteV2 { name: String },
    ManifestV2(ManifestOp),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::RegisterV1(op) => &op.name,
            Operation::DeleteV1 { name } | Operation::DeleteV2 { name } => name,
            Operation::ChunkV2(op) => &op.name,
            Operation::ManifestV2(op) => &op.name,
        }
    }
}

/// An operation stamped with its position in the decoded stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedOp {
    pub sequence: Sequence,
    pub op: Operation,
}
