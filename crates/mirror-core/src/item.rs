//! Item: the unit of remote storage.
//!
//! An item is an encrypted envelope plus server metadata. The engine never
//! looks inside `content` except through the note codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type tag carried by note items.
pub const NOTE_CONTENT_TYPE: &str = "Note";

/// A remote item as cached locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Opaque identity, stable across edits
    pub uuid: Uuid,
    /// Content type tag ("Note", "Tag", ...)
    pub content_type: String,
    /// Encrypted payload
    pub content: String,
    /// Set by the server when the item has been deleted remotely
    #[serde(default)]
    pub deleted: bool,
    /// Server-assigned creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Server-assigned last update time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Create an envelope for a brand-new item that the server has never seen.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            content_type: content_type.into(),
            content: String::new(),
            deleted: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Whether this item carries a note.
    pub fn is_note(&self) -> bool {
        self.content_type == NOTE_CONTENT_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_json_omits_missing_timestamps() {
        let item = Item::new(NOTE_CONTENT_TYPE);
        let json = serde_json::to_string(&item).unwrap();

        assert!(!json.contains("updated_at"));
        assert!(json.contains("\"deleted\":false"));
    }

    #[test]
    fn test_item_json_defaults_deleted_flag() {
        let json = r#"{"uuid":"6f1c4a52-3f0b-4b8e-9d1e-2a4f8c1b7e90","content_type":"Tag","content":"x"}"#;
        let item: Item = serde_json::from_str(json).unwrap();

        assert!(!item.deleted);
        assert!(!item.is_note());
        assert!(item.created_at.is_none());
    }
}
