//! Binary attachments stored next to documents.
//!
//! Attachments travel outside the unit of work: they are written and read directly
//! through the store handle, keyed by an arbitrary string, and carry no version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String metadata stored with an attachment.
pub type AttachmentMetadata = BTreeMap<String, String>;

/// A binary attachment as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// The key the attachment was stored under.
    pub key: String,
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Metadata supplied on the last write.
    pub metadata: AttachmentMetadata,
    /// Length of `data` in bytes.
    pub size: usize,
    /// When the attachment was last written.
    pub last_modified: DateTime<Utc>,
}

impl Attachment {
    pub fn new(key: impl Into<String>, data: Vec<u8>, metadata: AttachmentMetadata) -> Self {
        Self {
            key: key.into(),
            size: data.len(),
            data,
            metadata,
            last_modified: Utc::now(),
        }
    }

    /// Returns a metadata value.
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_follows_data() {
        let attachment = Attachment::new(
            "images/1",
            vec![0x89, 0x50, 0x4e, 0x47],
            BTreeMap::from([("Content-Type".to_string(), "image/png".to_string())]),
        );

        assert_eq!(attachment.size, 4);
        assert_eq!(attachment.metadata_value("Content-Type"), Some("image/png"));
        assert_eq!(attachment.metadata_value("Missing"), None);
    }
}
