//! Remote session traits: the boundary to the encrypted note service.
//!
//! Implementations:
//! - `MemoryRemote` - In-process server for testing
//! - `FolderRemote` (in mirror-daemon) - Server state kept in a shared directory
//!
//! Signing in is the job of each implementation's constructor; once a
//! session exists it can encrypt, decrypt, push and pull.

use crate::item::Item;
use crate::note::CodecError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Server acknowledgment of a single pushed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub uuid: Uuid,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome of one exchange with the server.
#[derive(Debug, Clone, Default)]
pub struct ExchangeResult {
    /// New or changed items from other clients
    pub retrieved: Vec<Item>,
    /// Server copies of the items this session pushed, with fresh metadata
    pub saved: Vec<Item>,
    /// Cursor covering everything returned so far
    pub cursor: String,
}

/// Encryption half of a session.
pub trait ItemCipher: Send + Sync {
    /// Decrypt an item's payload.
    fn decrypt(&self, item: &Item) -> std::result::Result<Vec<u8>, CodecError>;

    /// Encrypt a plaintext payload for the given item envelope.
    fn encrypt(&self, item: &Item, plaintext: &[u8]) -> std::result::Result<String, CodecError>;
}

/// A signed-in session with the remote store.
#[async_trait]
pub trait RemoteSession: ItemCipher {
    /// Push one item.
    async fn submit_update(&self, item: &Item) -> Result<Ack>;

    /// Pull everything after `cursor` (everything, if `None`).
    async fn exchange(&self, cursor: Option<&str>) -> Result<ExchangeResult>;
}

impl<T: ItemCipher> ItemCipher for std::sync::Arc<T> {
    fn decrypt(&self, item: &Item) -> std::result::Result<Vec<u8>, CodecError> {
        (**self).decrypt(item)
    }

    fn encrypt(&self, item: &Item, plaintext: &[u8]) -> std::result::Result<String, CodecError> {
        (**self).encrypt(item, plaintext)
    }
}

#[async_trait]
impl<T: RemoteSession> RemoteSession for std::sync::Arc<T> {
    async fn submit_update(&self, item: &Item) -> Result<Ack> {
        (**self).submit_update(item).await
    }

    async fn exchange(&self, cursor: Option<&str>) -> Result<ExchangeResult> {
        (**self).exchange(cursor).await
    }
}

/// Marker prefix for payloads "encrypted" by [`MemoryRemote`].
const MEMORY_CIPHER_PREFIX: &str = "mem:";

#[derive(Default)]
struct MemoryServer {
    /// Last assigned sequence number
    seq: u64,
    /// uuid -> (sequence of last change, item)
    items: BTreeMap<Uuid, (u64, Item)>,
    /// Pushed by this session since the last exchange
    submitted: Vec<Uuid>,
    /// Every item ever received through submit_update
    received: Vec<Item>,
    exchanges: usize,
    fail_submit: Option<RemoteError>,
    fail_exchange: Option<RemoteError>,
}

impl MemoryServer {
    fn store(&mut self, mut item: Item) -> Item {
        self.seq += 1;
        let now = Utc::now();
        item.created_at = item.created_at.or(Some(now));
        item.updated_at = Some(now);
        self.items.insert(item.uuid, (self.seq, item.clone()));
        item
    }
}

/// In-process remote store for testing.
///
/// Payloads are not really encrypted: the cipher tags plaintext with a
/// prefix so that decrypting foreign content still fails.
#[derive(Default)]
pub struct MemoryRemote {
    server: Mutex<MemoryServer>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn server(&self) -> std::sync::MutexGuard<'_, MemoryServer> {
        self.server.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate a change made by another client. Returns the stored copy.
    pub fn put_remote(&self, item: Item) -> Item {
        self.server().store(item)
    }

    /// Make every following submit_update fail with `error` (or succeed again).
    pub fn set_fail_submit(&self, error: Option<RemoteError>) {
        self.server().fail_submit = error;
    }

    /// Make every following exchange fail with `error` (or succeed again).
    pub fn set_fail_exchange(&self, error: Option<RemoteError>) {
        self.server().fail_exchange = error;
    }

    /// Items received through submit_update, in order.
    pub fn received(&self) -> Vec<Item> {
        self.server().received.clone()
    }

    /// Number of successful exchanges.
    pub fn exchange_count(&self) -> usize {
        self.server().exchanges
    }

    /// The server's current copy of an item.
    pub fn item(&self, uuid: &Uuid) -> Option<Item> {
        self.server().items.get(uuid).map(|(_, item)| item.clone())
    }
}

impl ItemCipher for MemoryRemote {
    fn decrypt(&self, item: &Item) -> std::result::Result<Vec<u8>, CodecError> {
        item.content
            .strip_prefix(MEMORY_CIPHER_PREFIX)
            .map(|plain| plain.as_bytes().to_vec())
            .ok_or_else(|| CodecError::Crypto(format!("Item {} was not encrypted by this session", item.uuid)))
    }

    fn encrypt(&self, _item: &Item, plaintext: &[u8]) -> std::result::Result<String, CodecError> {
        let plain = std::str::from_utf8(plaintext)
            .map_err(|e| CodecError::Crypto(format!("Plaintext is not UTF-8: {}", e)))?;
        Ok(format!("{}{}", MEMORY_CIPHER_PREFIX, plain))
    }
}

#[async_trait]
impl RemoteSession for MemoryRemote {
    async fn submit_update(&self, item: &Item) -> Result<Ack> {
        let mut server = self.server();
        if let Some(error) = server.fail_submit.clone() {
            return Err(error);
        }

        server.received.push(item.clone());
        let stored = server.store(item.clone());
        if !server.submitted.contains(&stored.uuid) {
            server.submitted.push(stored.uuid);
        }

        Ok(Ack {
            uuid: stored.uuid,
            updated_at: stored.updated_at,
        })
    }

    async fn exchange(&self, cursor: Option<&str>) -> Result<ExchangeResult> {
        let mut server = self.server();
        if let Some(error) = server.fail_exchange.clone() {
            return Err(error);
        }

        let since = match cursor {
            Some(c) => c
                .parse::<u64>()
                .map_err(|_| RemoteError::Protocol(format!("Invalid cursor: {}", c)))?,
            None => 0,
        };

        let submitted = std::mem::take(&mut server.submitted);

        // Retrieval order is server order (sequence), like a change feed
        let mut changed: Vec<&(u64, Item)> = server
            .items
            .values()
            .filter(|(seq, item)| *seq > since && !submitted.contains(&item.uuid))
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);
        let retrieved = changed.into_iter().map(|(_, item)| item.clone()).collect();

        let saved = submitted
            .iter()
            .filter_map(|uuid| server.items.get(uuid).map(|(_, item)| item.clone()))
            .collect();

        server.exchanges += 1;

        Ok(ExchangeResult {
            retrieved,
            saved,
            cursor: server.seq.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NOTE_CONTENT_TYPE;

    #[tokio::test]
    async fn test_exchange_separates_saved_from_retrieved() {
        let remote = MemoryRemote::new();
        let foreign = remote.put_remote(Item::new(NOTE_CONTENT_TYPE));
        let ours = Item::new(NOTE_CONTENT_TYPE);

        let ack = remote.submit_update(&ours).await.unwrap();
        assert_eq!(ack.uuid, ours.uuid);
        assert!(ack.updated_at.is_some());

        let result = remote.exchange(None).await.unwrap();
        assert_eq!(result.retrieved.len(), 1);
        assert_eq!(result.retrieved[0].uuid, foreign.uuid);
        assert_eq!(result.saved.len(), 1);
        assert_eq!(result.saved[0].uuid, ours.uuid);
        assert_eq!(result.cursor, "2");
    }

    #[tokio::test]
    async fn test_exchange_from_cursor_returns_only_newer() {
        let remote = MemoryRemote::new();
        remote.put_remote(Item::new(NOTE_CONTENT_TYPE));

        let first = remote.exchange(None).await.unwrap();
        let second = remote.exchange(Some(&first.cursor)).await.unwrap();

        assert_eq!(first.retrieved.len(), 1);
        assert!(second.retrieved.is_empty());
        assert_eq!(second.cursor, first.cursor);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let remote = MemoryRemote::new();
        remote.set_fail_submit(Some(RemoteError::Network("down".into())));

        let err = remote.submit_update(&Item::new(NOTE_CONTENT_TYPE)).await;
        assert!(matches!(err, Err(RemoteError::Network(_))));
        assert!(remote.received().is_empty());

        remote.set_fail_exchange(Some(RemoteError::Protocol("bad".into())));
        assert!(remote.exchange(None).await.is_err());
        assert_eq!(remote.exchange_count(), 0);
    }

    #[test]
    fn test_cipher_rejects_foreign_payload() {
        let remote = MemoryRemote::new();
        let mut item = Item::new(NOTE_CONTENT_TYPE);
        item.content = "003:opaque".into();

        assert!(matches!(remote.decrypt(&item), Err(CodecError::Crypto(_))));
    }
}
