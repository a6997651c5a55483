//! Upstream operation-log transport

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use crate::error::TransportError;
use crate::interpreter::LedgerRecord;

/// Supplies an owner's full operation log.
///
/// Records may come oldest-first or newest-first; the interpreter reorders them.
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn fetch_log(&self, owner: &str) -> Result<Vec<LedgerRecord>, TransportError>;
}

/// Reads account-history dumps from `<dir>/<owner>.json`.
///
/// A dump is either the bare history array or a JSON-RPC response holding it
/// under `result`.
#[derive(Debug, Clone)]
pub struct FileLogTransport {
    dir: PathBuf,
}

impl FileLogTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Extract `custom_json` records from a history dump
    pub fn parse_history(document: &Value) -> Result<Vec<LedgerRecord>, TransportError> {
        let history = document
            .get("result")
            .unwrap_or(document)
            .as_array()
            .ok_or_else(|| TransportError::Malformed("history is not an array".to_string()))?;
        Ok(history
            .iter()
            .filter_map(LedgerRecord::from_history_entry)
            .collect())
    }
}

#[async_trait]
impl LogTransport for FileLogTransport {
    async fn fetch_log(&self, owner: &str) -> Result<Vec<LedgerRecord>, TransportError> {
        if owner.contains(['/', '\\']) || owner.starts_with('.') {
            return Err(TransportError::Unavailable(format!("invalid owner {:?}", owner)));
        }
        let path = self.dir.join(format!("{}.json", owner));
        let content = fs::read(&path)
            .await
            .map_err(|e| TransportError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let document: Value = serde_json::from_slice(&content)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        Self::parse_history(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_parse_rpc_response() {
        let document = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [
                [7, {"op": ["custom_json", {"id": "hivemoji", "json": "{}"}]}],
                [8, {"op": ["transfer", {"amount": "1.000 HIVE"}]}]
            ]
        });
        let records = FileLogTransport::parse_history(&document).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position, 7);
    }

    #[tokio::test]
    async fn test_missing_dump_is_unavailable() {
        let dir = tempdir().unwrap();
        let transport = FileLogTransport::new(dir.path());
        assert!(matches!(
            transport.fetch_log("alice").await,
            Err(TransportError::Unavailable(_))
        ));
    }
}
