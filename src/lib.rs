//! Hivemoji Registry
//!
//! Custom emoji published as `custom_json` operations on an append-only
//! ledger, folded into per-owner registries and cached for renderers.
//!
//! ## Features
//!
//! - **Image Codec**: format sniffing (PNG/APNG, GIF, WebP) and checksummed fragments
//! - **Operation Log Interpreter**: v1 and v2 payloads decoded into typed operations
//! - **Chunk Reassembly**: chunked uploads regrouped and verified
//! - **Registry Builder**: last-write-wins fold with tombstones
//! - **Cache Manager**: memory and persistent tiers, coalesced fetches, stale fallback
//!
//! ## Architecture
//!
//! ```text
//! ledger records ──► interpreter ──► SequencedOp stream
//!                                        │
//!                         chunks ◄───────┤
//!                            │           ▼
//!                            └──────► registry (fold) ──► cache ──► renderer
//!                                                                     │
//!                                                            markers / select_image
//! ```

pub mod cache;
pub mod checksum;
pub mod chunks;
pub mod codec;
pub mod config;
pub mod encoding;
pub mod error;
pub mod interpreter;
pub mod markers;
pub mod operation;
pub mod protocol;
pub mod registry;
pub mod upload;

pub use cache::{CacheEntry, CacheSettings, RegistryCache};
pub use checksum::Checksum;
pub use codec::{sniff, ImageInfo};
pub use config::HivemojiConfig;
pub use error::{HivemojiError, RecordRejected, Result, TransportError};
pub use interpreter::{interpret, LedgerRecord};
pub use markers::marker_names;
pub use operation::{Operation, SequencedOp};
pub use protocol::{Limits, MimeType, PROTOCOL_ID};
pub use registry::{EmojiDefinition, Registry, RegistryBuilder};
pub use upload::{build_upload, UploadRequest};
