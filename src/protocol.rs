//! Wire protocol: identifiers, payload schemas and resource limits
//!
//! Every record this crate reads or writes is a `custom_json` operation whose
//! `id` is [`PROTOCOL_ID`] and whose `json` is one of two payload versions:
//!
//! ```text
//! v1  {version:1, op:"register"|"delete", name, mime?, width?, height?, data?, fallback?, animated?, loop?}
//! v2  {version:2, op:"chunk"|"delete"|"register", id?, name, kind?, mime?, width?, height?,
//!      seq?, total?, checksum?, data?, animated?, loop?, chunked?}
//! ```
//!
//! Binary data travels as standard base64.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::FragmentLimits;
use crate::encoding;

/// `custom_json` identifier of this protocol
pub const PROTOCOL_ID: &str = "hivemoji";

/// Single-shot payload version
pub const VERSION_V1: u64 = 1;

/// Chunked payload version
pub const VERSION_V2: u64 = 2;

/// Width/height substituted when a record omits them
pub const DEFAULT_DIMENSION: u32 = 32;

/// Maximum emoji name length
pub const MAX_NAME_LEN: usize = 32;

/// Check a name against `[a-z0-9_]{1,32}`
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Image types accepted in payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/webp")]
    Webp,
    #[serde(rename = "image/gif")]
    Gif,
    #[serde(rename = "image/jpeg")]
    Jpeg,
}

impl MimeType {
    pub const ALL: [MimeType; 4] = [MimeType::Png, MimeType::Webp, MimeType::Gif, MimeType::Jpeg];

    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Png => "image/png",
            MimeType::Webp => "image/webp",
            MimeType::Gif => "image/gif",
            MimeType::Jpeg => "image/jpeg",
        }
    }

    /// Case-insensitive prefix match, so `image/PNG; q=1` is PNG
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mime| lowered.starts_with(mime.as_str()))
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which image of an emoji a chunk group carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[default]
    Main,
    Fallback,
}

/// Resource bounds applied when reading and writing records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Ceiling on one serialized payload
    pub max_json_bytes: usize,
    /// Raw bytes allowed for inline (v1) image data
    pub max_inline_bytes: usize,
    /// Raw bytes per chunk fragment
    pub max_fragment_bytes: usize,
    /// Fragments per asset
    pub max_fragments: u32,
    /// Raw bytes per reassembled asset
    pub max_total_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_json_bytes: 8 * 1024,
            max_inline_bytes: 6000,
            max_fragment_bytes: 4 * 1024,
            max_fragments: 50,
            max_total_bytes: 100 * 1024,
        }
    }
}

impl Limits {
    /// Bounds handed to the fragment encoder and reassembler
    pub fn fragment_limits(&self) -> FragmentLimits {
        FragmentLimits {
            max_fragment_bytes: self.max_fragment_bytes,
            max_fragments: self.max_fragments,
            max_total_bytes: self.max_total_bytes,
            inline_ceiling: encoding::encoded_len(self.max_inline_bytes),
        }
    }
}

/// A width or height as found on the wire: a number, or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dimension {
    Number(serde_json::Number),
    Text(String),
}

impl Dimension {
    /// Resolve to a positive integer, or `None` for zero, negative or non-finite values
    pub fn resolve(&self) -> Option<u32> {
        let value = match self {
            Dimension::Number(n) => n.as_f64()?,
            Dimension::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        let rounded = value.round();
        if rounded < 1.0 || rounded > f64::from(u32::MAX) {
            return None;
        }
        Some(rounded as u32)
    }
}

impl From<u32> for Dimension {
    fn from(value: u32) -> Self {
        Dimension::Number(value.into())
    }
}

/// Operation names of the v1 schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum V1Op {
    Register,
    Update,
    Delete,
}

/// Operation names of the v2 schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum V2Op {
    Chunk,
    Delete,
    Register,
}

/// Inline non-animated alternative image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFallback {
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Single-shot payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V1Payload {
    pub version: u64,
    pub op: V1Op,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<WireFallback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_: Option<bool>,
}

impl V1Payload {
    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            version: VERSION_V1,
            op: V1Op::Delete,
            name: name.into(),
            mime: None,
            width: None,
            height: None,
            data: None,
            fallback: None,
            animated: None,
            loop_: None,
        }
    }
}

/// Chunked payload (chunks, deletes and manifests)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V2Payload {
    pub version: u64,
    pub op: V2Op,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChunkKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_total: Option<u64>,
}

/// A payload of either version
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    V1(V1Payload),
    V2(V2Payload),
}

impl Payload {
    pub fn name(&self) -> &str {
        match self {
            Payload::V1(p) => &p.name,
            Payload::V2(p) => &p.name,
        }
    }

    /// Operation name as it appears on the wire
    pub fn op_name(&self) -> &'static str {
        match self {
            Payload::V1(p) => match p.op {
                V1Op::Register => "register",
                V1Op::Update => "update",
                V1Op::Delete => "delete",
            },
            Payload::V2(p) => match p.op {
                V2Op::Chunk => "chunk",
                V2Op::Delete => "delete",
                V2Op::Register => "register",
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rule() {
        assert!(is_valid_name("smile"));
        assert!(is_valid_name("party_parrot_2"));
        assert!(is_valid_name(&"a".repeat(32)));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(&"a".repeat(33)));
        assert!(!is_valid_name("Smile"));
        assert!(!is_valid_name("smi-le"));
    }

    #[test]
    fn test_mime_prefix_match() {
        assert_eq!(MimeType::parse("image/PNG"), Some(MimeType::Png));
        assert_eq!(MimeType::parse("image/gif; charset=binary"), Some(MimeType::Gif));
        assert_eq!(MimeType::parse("image/jpeg"), Some(MimeType::Jpeg));
        assert_eq!(MimeType::parse("image/svg+xml"), None);
        assert_eq!(MimeType::parse("text/html"), None);
    }

    #[test]
    fn test_dimension_resolution() {
        let parse = |v: serde_json::Value| serde_json::from_value::<Dimension>(v).unwrap().resolve();
        assert_eq!(parse(serde_json::json!(24)), Some(24));
        assert_eq!(parse(serde_json::json!("48")), Some(48));
        assert_eq!(parse(serde_json::json!(0)), None);
        assert_eq!(parse(serde_json::json!(-3)), None);
        assert_eq!(parse(serde_json::json!("wide")), None);
    }

    #[test]
    fn test_v1_delete_serializes_minimal() {
        let json = Payload::V1(V1Payload::delete("smile")).to_json().unwrap();
        assert_eq!(json, r#"{"version":1,"op":"delete","name":"smile"}"#);
    }
}
