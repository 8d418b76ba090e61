//! Note codec: converts between encrypted items and structured notes.
//!
//! The serialized payload holds exactly four fields (`title`, `text`,
//! `references`, `appData`). The UUID is never part of the payload; it is
//! stamped from the envelope on decrypt.

use crate::item::{Item, NOTE_CONTENT_TYPE};
use crate::remote::ItemCipher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Application-specific data: group -> (key -> value).
pub type AppData = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Weak reference from a note to another item.
///
/// The target may not exist locally; nothing ever dereferences it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub uuid: Uuid,
    pub content_type: String,
}

/// Decrypted content of a note item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Identity of the item this note came from (not serialized)
    #[serde(skip)]
    pub uuid: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default, rename = "appData")]
    pub app_data: AppData,
}

impl Note {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::nil(),
            title: title.into(),
            text: text.into(),
            references: Vec::new(),
            app_data: AppData::new(),
        }
    }
}

/// Decrypt an item into a note.
pub fn decrypt<C: ItemCipher + ?Sized>(cipher: &C, item: &Item) -> Result<Note> {
    let plaintext = cipher.decrypt(item)?;
    let mut note: Note = serde_json::from_slice(&plaintext)
        .map_err(|e| CodecError::Serialization(format!("Item {}: {}", item.uuid, e)))?;
    note.uuid = item.uuid;
    Ok(note)
}

/// Encrypt a note, keeping every non-content field of `original` as is.
pub fn encrypt<C: ItemCipher + ?Sized>(cipher: &C, note: &Note, original: &Item) -> Result<Item> {
    let plaintext =
        serde_json::to_vec(note).map_err(|e| CodecError::Serialization(e.to_string()))?;
    let content = cipher.encrypt(original, &plaintext)?;
    Ok(Item {
        content,
        ..original.clone()
    })
}

/// Build the envelope for a note that has never been pushed.
///
/// Assigns a fresh UUID to `note` so that it matches the new item.
pub fn new_item<C: ItemCipher + ?Sized>(cipher: &C, note: &mut Note) -> Result<Item> {
    let envelope = Item::new(NOTE_CONTENT_TYPE);
    note.uuid = envelope.uuid;
    encrypt(cipher, note, &envelope)
}
