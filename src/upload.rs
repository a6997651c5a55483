//! Authoring path: image files to ledger payloads
//!
//! Small images become one v1 `register`. Anything whose payload would exceed
//! the record ceiling is split into v2 `chunk` records (main image first,
//! then the optional fallback), followed by a v2 `register` manifest.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::codec::{self, Fragment, ImageInfo};
use crate::encoding;
use crate::error::{HivemojiError, Result, TransportError};
use crate::protocol::{
    is_valid_name, ChunkKind, Limits, Payload, V1Op, V1Payload, V2Op, V2Payload, WireFallback,
    PROTOCOL_ID, VERSION_V1, VERSION_V2,
};

/// What to publish for one emoji
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub name: String,
    pub image: Vec<u8>,
    /// Still image for renderers that avoid animation
    pub fallback: Option<Vec<u8>>,
    pub animated: bool,
    pub loop_: bool,
}

/// Ordered payloads ready for broadcast
#[derive(Debug, Clone)]
pub struct Upload {
    pub payloads: Vec<Payload>,
    /// Serialized form of each payload, same order
    pub json: Vec<String>,
    /// Total serialized bytes
    pub size: usize,
}

impl Upload {
    fn from_payloads(payloads: Vec<Payload>, limits: &Limits) -> Result<Self> {
        let json = payloads
            .iter()
            .map(Payload::to_json)
            .collect::<serde_json::Result<Vec<_>>>()?;
        if let Some(oversized) = json.iter().find(|text| text.len() > limits.max_json_bytes) {
            return Err(HivemojiError::TooLarge(format!(
                "payload is {} bytes (> {})",
                oversized.len(),
                limits.max_json_bytes
            )));
        }
        let size = json.iter().map(String::len).sum();
        Ok(Self {
            payloads,
            json,
            size,
        })
    }

    pub fn is_chunked(&self) -> bool {
        self.payloads.len() > 1
    }
}

pub fn validate_name(name: &str) -> Result<&str> {
    if is_valid_name(name) {
        Ok(name)
    } else {
        Err(HivemojiError::InvalidName(name.to_string()))
    }
}

/// Fresh identifier shared by every chunk of one upload
pub fn upload_id(name: &str) -> String {
    format!(
        "{}-{}-{:x}",
        name,
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

/// Single v1 payload that deletes `name`
pub fn delete_payload(name: &str) -> Result<Upload> {
    validate_name(name)?;
    Upload::from_payloads(
        vec![Payload::V1(V1Payload::delete(name))],
        &Limits::default(),
    )
}

/// Build the payloads for a register, choosing single-shot or chunked form
pub fn build_upload(request: &UploadRequest, limits: &Limits) -> Result<Upload> {
    build_upload_with_id(request, limits, &upload_id(&request.name))
}

/// As [`build_upload`], with a caller-chosen upload id
pub fn build_upload_with_id(request: &UploadRequest, limits: &Limits, id: &str) -> Result<Upload> {
    let name = validate_name(&request.name)?;
    let main = codec::sniff(&request.image)?;
    let fallback = request
        .fallback
        .as_deref()
        .map(|bytes| codec::sniff(bytes).map(|info| (info, bytes)))
        .transpose()?;

    let animated = (request.animated || main.animated || main.loop_hint).then_some(true);
    let loop_ = request.loop_.then_some(true);

    let single = V1Payload {
        version: VERSION_V1,
        op: V1Op::Register,
        name: name.to_string(),
        mime: Some(main.mime.as_str().to_string()),
        width: Some(main.width.into()),
        height: Some(main.height.into()),
        data: Some(encoding::encode(&request.image)),
        fallback: fallback.map(|(info, bytes)| WireFallback {
            mime: Some(info.mime.as_str().to_string()),
            data: Some(encoding::encode(bytes)),
        }),
        animated,
        loop_,
    };
    let fits_inline = request.image.len() <= limits.max_inline_bytes
        && request
            .fallback
            .as_ref()
            .map_or(true, |bytes| bytes.len() <= limits.max_inline_bytes);
    let single = Payload::V1(single);
    if fits_inline && single.to_json()?.len() <= limits.max_json_bytes {
        return Upload::from_payloads(vec![single], limits);
    }

    let fragment_limits = limits.fragment_limits();
    let main_fragments = codec::split(&request.image, &fragment_limits)?;
    let fallback_fragments = fallback
        .map(|(info, bytes)| codec::split(bytes, &fragment_limits).map(|f| (info, f)))
        .transpose()?;

    let chunk = |info: &ImageInfo, kind: ChunkKind, fragment: &Fragment| {
        Payload::V2(V2Payload {
            version: VERSION_V2,
            op: V2Op::Chunk,
            name: name.to_string(),
            id: Some(id.to_string()),
            kind: Some(kind),
            mime: Some(info.mime.as_str().to_string()),
            width: Some(info.width.into()),
            height: Some(info.height.into()),
            seq: Some(u64::from(fragment.seq)),
            total: Some(u64::from(fragment.total)),
            checksum: fragment.checksum.as_ref().map(|c| c.to_string()),
            data: Some(encoding::encode(&fragment.data)),
            animated,
            loop_,
            chunked: None,
            main_total: None,
            fallback_total: None,
        })
    };

    let mut payloads: Vec<Payload> = main_fragments
        .iter()
        .map(|fragment| chunk(&main, ChunkKind::Main, fragment))
        .collect();
    if let Some((info, fragments)) = &fallback_fragments {
        payloads.extend(
            fragments
                .iter()
                .map(|fragment| chunk(info, ChunkKind::Fallback, fragment)),
        );
    }

    // Lets indexers that only look for register ops discover the emoji
    payloads.push(Payload::V2(V2Payload {
        version: VERSION_V2,
        op: V2Op::Register,
        name: name.to_string(),
        id: Some(id.to_string()),
        kind: None,
        mime: Some(main.mime.as_str().to_string()),
        width: Some(main.width.into()),
        height: Some(main.height.into()),
        seq: None,
        total: None,
        checksum: None,
        data: None,
        animated,
        loop_,
        chunked: Some(true),
        main_total: Some(main_fragments.len() as u64),
        fallback_total: fallback_fragments.as_ref().map(|(_, f)| f.len() as u64),
    }));

    Upload::from_payloads(payloads, limits)
}

/// Submits one signed `custom_json` to the ledger
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(
        &self,
        owner: &str,
        protocol_id: &str,
        json: &str,
        title: &str,
    ) -> std::result::Result<(), TransportError>;
}

/// Broadcast every payload in order, stopping at the first rejection.
///
/// Later chunks are useless without the earlier ones, so nothing after a
/// failure is sent. Returns the number of payloads accepted.
pub async fn broadcast_all(
    broadcaster: &dyn Broadcaster,
    owner: &str,
    upload: &Upload,
) -> Result<usize> {
    let total = upload.json.len();
    for (i, (payload, json)) in upload.payloads.iter().zip(&upload.json).enumerate() {
        let title = format!(
            "Hivemoji {}: :{}: ({}/{})",
            payload.op_name(),
            payload.name(),
            i + 1,
            total
        );
        broadcaster
            .broadcast(owner, PROTOCOL_ID, json, &title)
            .await
            .map_err(|e| HivemojiError::BroadcastRejected {
                index: i + 1,
                total,
                reason: e.to_string(),
            })?;
        info!(owner, index = i + 1, total, "broadcast accepted");
    }
    Ok(total)
}
