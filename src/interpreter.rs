//! Operation Log Interpreter
//!
//! Turns an owner's raw ledger records into an ordered stream of typed
//! operations. Each record is decoded on its own: a malformed, oversized or
//! foreign record is skipped and the rest of the log is still read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::checksum::Checksum;
use crate::encoding;
use crate::error::RecordRejected;
use crate::operation::{
    ChunkOp, InlineFallback, ManifestOp, Operation, RegisterOp, Sequence, SequencedOp,
};
use crate::protocol::{
    is_valid_name, Dimension, Limits, MimeType, V1Op, V1Payload, V2Op, V2Payload, WireFallback,
    DEFAULT_DIMENSION, PROTOCOL_ID, VERSION_V1, VERSION_V2,
};

/// Ledger operation name of the records this crate reads
pub const CUSTOM_JSON: &str = "custom_json";

/// One `custom_json` record from an owner's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Position in the owner's log
    pub position: u64,
    /// Custom identifier; must equal [`PROTOCOL_ID`] to be read
    pub id: String,
    /// Payload, either a JSON object or a string holding JSON
    pub json: Value,
}

impl LedgerRecord {
    pub fn new(position: u64, id: impl Into<String>, json: impl Into<Value>) -> Self {
        Self {
            position,
            id: id.into(),
            json: json.into(),
        }
    }

    /// Parse one account-history entry: `[index, {"op": ["custom_json", {...}]}]`.
    ///
    /// Returns `None` for entries that are not `custom_json` operations.
    pub fn from_history_entry(entry: &Value) -> Option<Self> {
        let pair = entry.as_array()?;
        let position = pair.first()?.as_u64()?;
        let body = pair.get(1)?;
        let op = body.get("op").or_else(|| body.get(1))?.as_array()?;
        if op.first()?.as_str()? != CUSTOM_JSON {
            return None;
        }
        let data = op.get(1)?;
        Some(Self {
            position,
            id: data.get("id")?.as_str()?.to_string(),
            json: data.get("json").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Decode one record into an operation
pub fn decode_record(record: &LedgerRecord, limits: &Limits) -> Result<Operation, RecordRejected> {
    if record.id != PROTOCOL_ID {
        return Err(RecordRejected::ForeignProtocol(record.id.clone()));
    }

    let mut payload = match &record.json {
        Value::String(text) => serde_json::from_str::<Value>(text)
            .map_err(|e| RecordRejected::MalformedPayload(e.to_string()))?,
        other => other.clone(),
    };
    let Some(fields) = payload.as_object_mut() else {
        return Err(RecordRejected::MalformedPayload(
            "payload is not an object".to_string(),
        ));
    };

    let raw_version = fields
        .get("version")
        .cloned()
        .ok_or_else(|| RecordRejected::UnsupportedVersion("missing".to_string()))?;
    // Numeric comparison: `1.0` is version 1
    let version = match raw_version.as_f64() {
        Some(v) if v == VERSION_V1 as f64 => VERSION_V1,
        Some(v) if v == VERSION_V2 as f64 => VERSION_V2,
        _ => return Err(RecordRejected::UnsupportedVersion(raw_version.to_string())),
    };
    fields.insert("version".to_string(), Value::from(version));

    if version == VERSION_V1 {
        decode_v1(
            serde_json::from_value(payload)
                .map_err(|e| RecordRejected::MalformedPayload(e.to_string()))?,
            limits,
        )
    } else {
        decode_v2(
            serde_json::from_value(payload)
                .map_err(|e| RecordRejected::MalformedPayload(e.to_string()))?,
            limits,
        )
    }
}

fn decode_v1(payload: V1Payload, limits: &Limits) -> Result<Operation, RecordRejected> {
    let name = checked_name(payload.name)?;
    match payload.op {
        V1Op::Delete => Ok(Operation::DeleteV1 { name }),
        V1Op::Register | V1Op::Update => {
            let mime = required_mime(payload.mime.as_deref())?;
            let data = required_data(payload.data.as_deref(), "data", limits.max_inline_bytes)?;
            let (width, height) = dimensions(payload.width.as_ref(), payload.height.as_ref())?;
            let fallback = match payload.fallback {
                Some(fallback) => inline_fallback(fallback, limits)?,
                None => None,
            };
            Ok(Operation::RegisterV1(RegisterOp {
                name,
                mime,
                width,
                height,
                data,
                fallback,
                animated: payload.animated,
                loop_: payload.loop_,
            }))
        }
    }
}

fn decode_v2(payload: V2Payload, limits: &Limits) -> Result<Operation, RecordRejected> {
    let name = checked_name(payload.name)?;
    match payload.op {
        V2Op::Delete => Ok(Operation::DeleteV2 { name }),
        V2Op::Chunk => {
            let id = payload
                .id
                .filter(|id| !id.is_empty())
                .ok_or(RecordRejected::MissingField("id"))?;
            let mime = required_mime(payload.mime.as_deref())?;
            let (width, height) = dimensions(payload.width.as_ref(), payload.height.as_ref())?;

            let total = payload.total.ok_or(RecordRejected::MissingField("total"))?;
            if total == 0 || total > u64::from(limits.max_fragments) {
                return Err(RecordRejected::InvalidTotal(total));
            }
            let seq = payload.seq.ok_or(RecordRejected::MissingField("seq"))?;
            if seq >= total {
                return Err(RecordRejected::SeqOutOfRange { seq, total });
            }

            let data = required_data(payload.data.as_deref(), "data", limits.max_fragment_bytes)?;
            Ok(Operation::ChunkV2(ChunkOp {
                id,
                kind: payload.kind.unwrap_or_default(),
                name,
                mime,
                width,
                height,
                seq: seq as u32,
                total: total as u32,
                checksum: payload.checksum.as_deref().map(Checksum::from_hex),
                data,
                animated: payload.animated,
                loop_: payload.loop_,
            }))
        }
        V2Op::Register => {
            let mime = payload.mime.as_deref().map(parse_mime).transpose()?;
            let data = match payload.data.as_deref() {
                Some(text) => Some(required_data(Some(text), "data", limits.max_inline_bytes)?),
                None => None,
            };
            let (width, height) = dimensions(payload.width.as_ref(), payload.height.as_ref())?;
            Ok(Operation::ManifestV2(ManifestOp {
                name,
                id: payload.id,
                mime,
                width,
                height,
                data,
                animated: payload.animated,
                loop_: payload.loop_,
            }))
        }
    }
}

fn checked_name(name: String) -> Result<String, RecordRejected> {
    if is_valid_name(&name) {
        Ok(name)
    } else {
        Err(RecordRejected::InvalidName(name))
    }
}

fn parse_mime(raw: &str) -> Result<MimeType, RecordRejected> {
    MimeType::parse(raw).ok_or_else(|| RecordRejected::UnsupportedMime(raw.to_string()))
}

fn required_mime(raw: Option<&str>) -> Result<MimeType, RecordRejected> {
    parse_mime(raw.ok_or(RecordRejected::MissingField("mime"))?)
}

fn required_data(
    raw: Option<&str>,
    field: &'static str,
    max: usize,
) -> Result<Vec<u8>, RecordRejected> {
    let text = raw
        .filter(|text| !text.is_empty())
        .ok_or(RecordRejected::MissingField(field))?;
    // Cheap bound before decoding anything
    let approx = text.len() / 4 * 3;
    if approx > max + 2 {
        return Err(RecordRejected::PayloadTooLarge { size: approx, max });
    }
    let bytes = encoding::decode(text).map_err(|_| RecordRejected::InvalidData(field))?;
    if bytes.len() > max {
        return Err(RecordRejected::PayloadTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(bytes)
}

fn dimensions(
    width: Option<&Dimension>,
    height: Option<&Dimension>,
) -> Result<(u32, u32), RecordRejected> {
    let resolve = |dim: Option<&Dimension>| match dim {
        None => Ok(DEFAULT_DIMENSION),
        Some(dim) => dim.resolve().ok_or(RecordRejected::InvalidDimensions),
    };
    Ok((resolve(width)?, resolve(height)?))
}

fn inline_fallback(
    fallback: WireFallback,
    limits: &Limits,
) -> Result<Option<InlineFallback>, RecordRejected> {
    let (Some(mime), Some(data)) = (fallback.mime.as_deref(), fallback.data.as_deref()) else {
        return Ok(None);
    };
    Ok(Some(InlineFallback {
        mime: parse_mime(mime)?,
        data: required_data(Some(data), "fallback.data", limits.max_inline_bytes)?,
    }))
}
