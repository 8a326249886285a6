//! Chunked upload types

use serde::{Deserialize, Serialize};

/// Metadata sidecar persisted in every upload session directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMeta {
    pub upload_id: String,
    pub file_name: String,
    /// Declared by the client, in bytes
    pub size: u64,
    pub mime: String,
    pub chunk_size: u64,
    pub sender: String,
    /// Milliseconds since the Unix epoch
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
}

impl UploadMeta {
    /// `ceil(size / chunk_size)`; an empty file has no chunks
    pub fn total_chunks(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.size.div_ceil(self.chunk_size)
    }
}

/// `POST /uploads`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub size: u64,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Chunk indices already on disk when resuming, ascending
    pub uploaded: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub uploaded: Vec<u64>,
}

/// `POST /text`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTextRequest {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64, chunk_size: u64) -> UploadMeta {
        UploadMeta {
            upload_id: "u".into(),
            file_name: "f.bin".into(),
            size,
            mime: String::new(),
            chunk_size,
            sender: "alice".into(),
            start_time: 0,
            file_key: None,
        }
    }

    #[test]
    fn test_total_chunks() {
        assert_eq!(meta(0, 4).total_chunks(), 0);
        assert_eq!(meta(1, 4).total_chunks(), 1);
        assert_eq!(meta(4, 4).total_chunks(), 1);
        assert_eq!(meta(5, 4).total_chunks(), 2);
        assert_eq!(meta(10, 0).total_chunks(), 0);
    }

    #[test]
    fn test_init_request_defaults() {
        let req: InitUploadRequest =
            serde_json::from_str(r#"{"fileName":"a.txt","size":3}"#).unwrap();
        assert_eq!(req.file_name, "a.txt");
        assert!(req.chunk_size.is_none());
        assert!(req.file_key.is_none());
        assert!(req.mime.is_empty());
    }
}
