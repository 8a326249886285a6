//! Transfer index entries

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A single entry of the transfer index: a pasted text or a finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub id: String,
    #[serde(flatten)]
    pub payload: TransferPayload,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub sender: String,
}

/// Kind-specific part of a [`TransferItem`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransferPayload {
    Text {
        content: String,
    },
    File {
        name: String,
        size: u64,
        mime: String,
        url: String,
    },
}

/// Item kind without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Text,
    File,
}

impl TransferItem {
    pub fn text(sender: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            payload: TransferPayload::Text {
                content: content.into(),
            },
            timestamp,
            sender: sender.into(),
        }
    }

    pub fn file(
        sender: impl Into<String>,
        name: impl Into<String>,
        size: u64,
        mime: impl Into<String>,
        url: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            payload: TransferPayload::File {
                name: name.into(),
                size,
                mime: mime.into(),
                url: url.into(),
            },
            timestamp,
            sender: sender.into(),
        }
    }

    pub fn kind(&self) -> TransferKind {
        match self.payload {
            TransferPayload::Text { .. } => TransferKind::Text,
            TransferPayload::File { .. } => TransferKind::File,
        }
    }

    /// A file item whose mime type is `image/*`
    pub fn is_photo(&self) -> bool {
        matches!(&self.payload, TransferPayload::File { mime, .. } if mime.starts_with("image/"))
    }

    /// Last path segment of the artifact url for file items
    pub fn artifact_name(&self) -> Option<&str> {
        match &self.payload {
            TransferPayload::File { url, .. } => url.rsplit('/').next().filter(|s| !s.is_empty()),
            TransferPayload::Text { .. } => None,
        }
    }
}

/// Selection applied by `list`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFilter {
    #[default]
    All,
    Text,
    File,
    /// File items with an `image/` mime type
    Photo,
}

impl ListFilter {
    pub fn matches(&self, item: &TransferItem) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Text => item.kind() == TransferKind::Text,
            ListFilter::File => item.kind() == TransferKind::File,
            ListFilter::Photo => item.is_photo(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown filter: {0}")]
pub struct ParseFilterError(pub String);

impl FromStr for ListFilter {
    type Err = ParseFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(ListFilter::All),
            "text" => Ok(ListFilter::Text),
            "file" => Ok(ListFilter::File),
            "photo" => Ok(ListFilter::Photo),
            other => Err(ParseFilterError(other.to_string())),
        }
    }
}
