//! Emoji Registry
//!
//! A [`Registry`] is an immutable `name -> EmojiDefinition` snapshot for one
//! owner. [`RegistryBuilder`] produces snapshots by folding a decoded
//! operation stream on top of an optional seed, resolving conflicts by
//! last-write-wins on the operation sequence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::chunks::{ChunkAssembler, FinishedAsset};
use crate::encoding::base64_bytes;
use crate::operation::{Operation, RegisterOp, Sequence, SequencedOp, SEED_SEQUENCE};
use crate::protocol::{ChunkKind, Limits, MimeType, DEFAULT_DIMENSION};

fn seed_sequence() -> Sequence {
    SEED_SEQUENCE
}

/// Alternative image used when a renderer must avoid animation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    pub mime: MimeType,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(skip, default = "seed_sequence")]
    pub(crate) sequence: Sequence,
}

impl Fallback {
    pub fn new(mime: MimeType, data: Vec<u8>) -> Self {
        Self {
            mime,
            data,
            sequence: SEED_SEQUENCE,
        }
    }
}

/// One named image belonging to one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiDefinition {
    pub owner: String,
    pub name: String,
    pub mime: MimeType,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_: Option<bool>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Fallback>,
    /// Tombstone: kept for ordering, never rendered
    #[serde(default)]
    pub deleted: bool,
    /// Operation that last wrote this entry
    #[serde(skip, default = "seed_sequence")]
    pub(crate) sequence: Sequence,
}

impl EmojiDefinition {
    fn from_register(owner: &str, op: RegisterOp, sequence: Sequence) -> Self {
        Self {
            owner: owner.to_string(),
            name: op.name,
            mime: op.mime,
            width: op.width,
            height: op.height,
            animated: op.animated,
            loop_: op.loop_,
            data: op.data,
            fallback: op.fallback.map(|fb| Fallback {
                mime: fb.mime,
                data: fb.data,
                sequence,
            }),
            deleted: false,
            sequence,
        }
    }

    fn from_asset(owner: &str, asset: FinishedAsset) -> Self {
        Self {
            owner: owner.to_string(),
            name: asset.name,
            mime: asset.mime,
            width: asset.width,
            height: asset.height,
            animated: asset.animated,
            loop_: asset.loop_,
            data: asset.data,
            fallback: None,
            deleted: false,
            sequence: asset.sequence,
        }
    }

    fn tombstone(owner: &str, name: String, sequence: Sequence) -> Self {
        Self {
            owner: owner.to_string(),
            name,
            mime: MimeType::Png,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            animated: None,
            loop_: None,
            data: Vec::new(),
            fallback: None,
            deleted: true,
            sequence,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Immutable `name -> definition` snapshot for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: BTreeMap<String, EmojiDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored `(name, definition)` pairs
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, EmojiDefinition)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Live definition for `name`; tombstones are hidden
    pub fn get(&self, name: &str) -> Option<&EmojiDefinition> {
        self.entries.get(name).filter(|def| def.is_live())
    }

    /// Entry for `name`, tombstone included
    pub fn entry(&self, name: &str) -> Option<&EmojiDefinition> {
        self.entries.get(name)
    }

    /// Whether the registry knows about every name, deleted or not
    pub fn satisfies<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names
            .iter()
            .all(|name| self.entries.contains_key(name.as_ref()))
    }

    /// All entries in name order, tombstones included
    pub fn entries(&self) -> impl Iterator<Item = (&String, &EmojiDefinition)> {
        self.entries.iter()
    }

    /// Live definitions in name order
    pub fn live(&self) -> impl Iterator<Item = &EmojiDefinition> {
        self.entries.values().filter(|def| def.is_live())
    }

    /// Ordered `(name, definition)` pairs for persistence
    pub fn to_entries(&self) -> Vec<(String, EmojiDefinition)> {
        self.entries
            .iter()
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy with every sequence reset, so fresh operations always win over it
    pub(crate) fn reseeded(&self) -> BTreeMap<String, EmojiDefinition> {
        self.entries
            .iter()
            .map(|(name, def)| {
                let mut def = def.clone();
                def.sequence = SEED_SEQUENCE;
                if let Some(fallback) = def.fallback.as_mut() {
                    fallback.sequence = SEED_SEQUENCE;
                }
                (name.clone(), def)
            })
            .collect()
    }
}

enum Event {
    Upsert(EmojiDefinition),
    Delete(String),
}

/// Folds an operation stream into a new [`Registry`]
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    owner: String,
    limits: Limits,
    entries: BTreeMap<String, EmojiDefinition>,
}

impl RegistryBuilder {
    pub fn new(owner: impl Into<String>, limits: Limits) -> Self {
        Self {
            owner: owner.into(),
            limits,
            entries: BTreeMap::new(),
        }
    }

    /// Start from an existing snapshot; its entries rank below every fresh operation
    pub fn with_seed(mut self, seed: &Registry) -> Self {
        self.entries = seed.reseeded();
        self
    }

    /// Fold the operations and publish the resulting snapshot
    pub fn fold<I>(mut self, ops: I) -> Registry
    where
        I: IntoIterator<Item = SequencedOp>,
    {
        let mut ops: Vec<SequencedOp> = ops.into_iter().collect();
        ops.sort_by_key(|op| op.sequence);

        let mut assembler = ChunkAssembler::new(&self.limits);
        let mut events: Vec<(Sequence, Event)> = Vec::new();
        for SequencedOp { sequence, op } in ops {
            match op {
                Operation::RegisterV1(register) => events.push((
                    sequence,
                    Event::Upsert(EmojiDefinition::from_register(&self.owner, register, sequence)),
                )),
                Operation::DeleteV1 { name } | Operation::DeleteV2 { name } => {
                    events.push((sequence, Event::Delete(name)))
                }
                Operation::ChunkV2(chunk) => {
                    // Rejections are logged by the assembler
                    let _ = assembler.accept(chunk, sequence);
                }
                Operation::ManifestV2(manifest) => {
                    let name = manifest.name.clone();
                    match manifest.into_register() {
                        Some(register) => events.push((
                            sequence,
                            Event::Upsert(EmojiDefinition::from_register(&self.owner, register, sequence)),
                        )),
                        None => trace!(%name, "manifest carries no pixels"),
                    }
                }
            }
        }

        let mut fallbacks = Vec::new();
        for asset in assembler.finish() {
            match asset.kind {
                ChunkKind::Main => events.push((
                    asset.sequence,
                    Event::Upsert(EmojiDefinition::from_asset(&self.owner, asset)),
                )),
                ChunkKind::Fallback => fallbacks.push(asset),
            }
        }

        events.sort_by_key(|(sequence, _)| *sequence);
        for (sequence, event) in events {
            self.apply(sequence, event);
        }

        // Runs after the whole log so a fallback uploaded before its main image still attaches
        for asset in fallbacks {
            self.attach_fallback(asset);
        }

        debug!(owner = %self.owner, entries = self.entries.len(), "built registry");
        Registry {
            entries: self.entries,
        }
    }

    fn apply(&mut self, sequence: Sequence, event: Event) {
        match event {
            Event::Upsert(def) => {
                let newer = self
                    .entries
                    .get(&def.name)
                    .map_or(true, |current| current.sequence < sequence);
                if newer {
                    self.entries.insert(def.name.clone(), def);
                }
            }
            Event::Delete(name) => match self.entries.get_mut(&name) {
                Some(current) => {
                    if current.sequence < sequence {
                        // Tombstones keep ordering only, never pixels
                        current.deleted = true;
                        current.sequence = sequence;
                        current.data = Vec::new();
                        current.fallback = None;
                    }
                }
                None => {
                    let tombstone = EmojiDefinition::tombstone(&self.owner, name.clone(), sequence);
                    self.entries.insert(name, tombstone);
                }
            },
        }
    }

    fn attach_fallback(&mut self, asset: FinishedAsset) {
        let Some(entry) = self.entries.get_mut(&asset.name) else {
            debug!(name = %asset.name, "fallback has no main entry");
            return;
        };
        if entry.deleted {
            return;
        }
        let newer = entry
            .fallback
            .as_ref()
            .map_or(true, |current| current.sequence <= asset.sequence);
        if newer {
            entry.fallback = Some(Fallback {
                mime: asset.mime,
                data: asset.data,
                sequence: asset.sequence,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::operation::{ChunkOp, InlineFallback, ManifestOp};

    fn register(name: &str, data: &[u8]) -> Operation {
        Operation::RegisterV1(RegisterOp {
            name: name.to_string(),
            mime: MimeType::Png,
            width: 16,
            height: 16,
            data: data.to_vec(),
            fallback: None,
            animated: None,
            loop_: None,
        })
    }

    fn delete(name: &str) -> Operation {
        Operation::DeleteV1 {
            name: name.to_string(),
        }
    }

    fn at(sequence: Sequence, op: Operation) -> SequencedOp {
        SequencedOp { sequence, op }
    }

    fn chunk(kind: ChunkKind, name: &str, seq: u32, total: u32, whole: &[u8], data: &[u8]) -> Operation {
        Operation::ChunkV2(ChunkOp {
            id: format!("{}-upload", name),
            kind,
            name: name.to_string(),
            mime: if kind == ChunkKind::Main { MimeType::Gif } else { MimeType::Png },
            width: 64,
            height: 64,
            seq,
            total,
            checksum: Some(Checksum::from_bytes(whole)),
            data: data.to_vec(),
            animated: Some(true),
            loop_: Some(true),
        })
    }

    fn build(ops: Vec<SequencedOp>) -> Registry {
        RegistryBuilder::new("alice", Limits::default()).fold(ops)
    }

    #[test]
    fn test_last_write_wins_regardless_of_arrival() {
        let forward = build(vec![at(3, register("smile", b"v1")), at(7, register("smile", b"v2"))]);
        let reverse = build(vec![at(7, register("smile", b"v2")), at(3, register("smile", b"v1"))]);
        assert_eq!(forward.get("smile").unwrap().data, b"v2");
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_delete_then_register_is_live() {
        let registry = build(vec![at(5, delete("smile")), at(9, register("smile", b"px"))]);
        let def = registry.get("smile").unwrap();
        assert!(def.is_live());
        assert_eq!(def.sequence, 9);
    }

    #[test]
    fn test_register_then_delete_is_tombstone() {
        let registry = build(vec![at(9, register("smile", b"px")), at(12, delete("smile"))]);
        assert!(registry.get("smile").is_none());
        let entry = registry.entry("smile").unwrap();
        assert!(entry.deleted);
        assert_eq!(entry.sequence, 12);
        assert!(registry.satisfies(&["smile"]));
    }

    #[test]
    fn test_tombstone_drops_image_bytes() {
        let with_fallback = Operation::RegisterV1(RegisterOp {
            name: "smile".to_string(),
            mime: MimeType::Gif,
            width: 16,
            height: 16,
            data: b"animated".to_vec(),
            fallback: Some(InlineFallback {
                mime: MimeType::Png,
                data: b"still".to_vec(),
            }),
            animated: Some(true),
            loop_: None,
        });
        let registry = build(vec![at(1, with_fallback), at(2, delete("smile"))]);
        let entry = registry.entry("smile").unwrap();
        assert!(entry.deleted);
        assert!(entry.data.is_empty());
        assert!(entry.fallback.is_none());

        let stored = serde_json::to_value(registry.to_entries()).unwrap();
        assert_eq!(stored[0][1]["data"], "");
        assert!(stored[0][1].get("fallback").is_none());
    }

    #[test]
    fn test_chunked_upload_with_fallback_before_main() {
        let main = b"GIF89a-main-frames";
        let still = b"PNG-still";
        let registry = build(vec![
            at(0, chunk(ChunkKind::Fallback, "wave", 0, 1, still, still)),
            at(1, chunk(ChunkKind::Main, "wave", 0, 2, main, &main[..9])),
            at(2, chunk(ChunkKind::Main, "wave", 1, 2, main, &main[9..])),
        ]);
        let def = registry.get("wave").unwrap();
        assert_eq!(def.data, main);
        assert_eq!(def.mime, MimeType::Gif);
        assert_eq!(def.animated, Some(true));
        let fallback = def.fallback.as_ref().unwrap();
        assert_eq!(fallback.data, still);
        assert_eq!(fallback.mime, MimeType::Png);
    }

    #[test]
    fn test_orphan_fallback_is_dropped() {
        let still = b"PNG-still";
        let registry = build(vec![at(0, chunk(ChunkKind::Fallback, "wave", 0, 1, still, still))]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_older_fallback_does_not_replace_newer_one() {
        let registry = build(vec![
            at(0, chunk(ChunkKind::Fallback, "wave", 0, 1, b"old", b"old")),
            at(
                5,
                Operation::RegisterV1(RegisterOp {
                    fallback: Some(InlineFallback {
                        mime: MimeType::Png,
                        data: b"inline".to_vec(),
                    }),
                    ..match register("wave", b"px") {
                        Operation::RegisterV1(op) => op,
                        _ => unreachable!(),
                    }
                }),
            ),
        ]);
        assert_eq!(registry.get("wave").unwrap().fallback.as_ref().unwrap().data, b"inline");
    }

    #[test]
    fn test_manifest_without_pixels_is_informational() {
        let registry = build(vec![
            at(0, register("smile", b"px")),
            at(
                1,
                Operation::ManifestV2(ManifestOp {
                    name: "smile".to_string(),
                    id: Some("smile-1".to_string()),
                    mime: Some(MimeType::Gif),
                    width: 64,
                    height: 64,
                    data: None,
                    animated: Some(true),
                    loop_: None,
                }),
            ),
        ]);
        let def = registry.get("smile").unwrap();
        assert_eq!(def.data, b"px");
        assert_eq!(def.mime, MimeType::Png);
    }

    #[test]
    fn test_fresh_operations_supersede_seed() {
        let seed = build(vec![at(40, register("smile", b"cached")), at(41, register("wink", b"cached"))]);
        let registry = RegistryBuilder::new("alice", Limits::default())
            .with_seed(&seed)
            .fold(vec![at(0, register("smile", b"fresh"))]);
        assert_eq!(registry.get("smile").unwrap().data, b"fresh");
        assert_eq!(registry.get("wink").unwrap().data, b"cached");
    }

    #[test]
    fn test_fold_is_deterministic() {
        let ops = vec![
            at(0, register("a", b"1")),
            at(1, delete("b")),
            at(2, register("b", b"2")),
            at(3, delete("a")),
        ];
        assert_eq!(build(ops.clone()), build(ops));
    }
}
