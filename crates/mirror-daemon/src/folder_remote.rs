//! Folder-backed remote session.
//!
//! The "server" is a single `server.json` file in a directory shared
//! between machines (a network mount, a synced folder). It holds the
//! account's key check, a sequence counter and every item ever pushed,
//! each tagged with the sequence number of its last change.
//!
//! Payloads are ChaCha20-Poly1305 encrypted with a key derived from the
//! account credentials, and stored as `001:<base64(nonce || ciphertext)>`.
//! The item UUID is bound in as associated data, so content cannot be
//! moved between items.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use chrono::Utc;
use mirror_core::item::Item;
use mirror_core::note::CodecError;
use mirror_core::remote::{Ack, ExchangeResult, ItemCipher, RemoteError, RemoteSession, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Name of the state file inside the shared directory.
pub const SERVER_FILE: &str = "server.json";

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
const NONCE_SIZE: usize = 12;

/// Version tag of the payload format.
const PAYLOAD_PREFIX: &str = "001:";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    seq: u64,
    item: Item,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerState {
    email: String,
    key_check: String,
    seq: u64,
    items: BTreeMap<Uuid, StoredItem>,
}

/// A signed-in session against a shared directory.
pub struct FolderRemote {
    path: PathBuf,
    cipher: ChaCha20Poly1305,
    /// Pushed by this session since the last exchange
    submitted: Mutex<Vec<Uuid>>,
}

fn derive_key(email: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(email.trim().to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

fn key_check(key: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"key-check:");
    hasher.update(key);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

impl FolderRemote {
    /// Sign in to the account stored in `dir`.
    ///
    /// An empty directory is initialized for `email`. Credentials that do
    /// not match an existing account are rejected with
    /// [`RemoteError::Unauthorized`].
    pub async fn sign_in(dir: impl AsRef<Path>, email: &str, password: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(SERVER_FILE);
        let key = derive_key(email, password);
        let check = key_check(&key);

        let remote = Self {
            path,
            cipher: ChaCha20Poly1305::new((&key).into()),
            submitted: Mutex::new(Vec::new()),
        };

        match remote.load().await? {
            Some(state) => {
                if !state.email.eq_ignore_ascii_case(email.trim()) || state.key_check != check {
                    return Err(RemoteError::Unauthorized(format!(
                        "Invalid email or password for {}",
                        dir.display()
                    )));
                }
                debug!("Signed in to {} ({} items)", dir.display(), state.items.len());
            }
            None => {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| RemoteError::Network(format!("{}: {}", dir.display(), e)))?;
                remote
                    .save(&ServerState {
                        email: email.trim().to_string(),
                        key_check: check,
                        seq: 0,
                        items: BTreeMap::new(),
                    })
                    .await?;
                info!("Created new account in {}", dir.display());
            }
        }

        Ok(remote)
    }

    async fn load(&self) -> Result<Option<ServerState>> {
        let contents = match fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RemoteError::Network(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|e| RemoteError::Protocol(format!("{}: {}", self.path.display(), e)))
    }

    async fn load_existing(&self) -> Result<ServerState> {
        self.load().await?.ok_or_else(|| {
            RemoteError::Unauthorized(format!("Account at {} no longer exists", self.path.display()))
        })
    }

    /// Write the state through a temporary file so readers never see a
    /// partial write.
    async fn save(&self, state: &ServerState) -> Result<()> {
        let contents = serde_json::to_vec_pretty(state)
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, contents)
            .await
            .map_err(|e| RemoteError::Network(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RemoteError::Network(format!("{}: {}", self.path.display(), e)))
    }

    fn submitted(&self) -> std::sync::MutexGuard<'_, Vec<Uuid>> {
        self.submitted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ItemCipher for FolderRemote {
    fn decrypt(&self, item: &Item) -> std::result::Result<Vec<u8>, CodecError> {
        let encoded = item.content.strip_prefix(PAYLOAD_PREFIX).ok_or_else(|| {
            CodecError::Crypto(format!("Item {} has an unsupported payload format", item.uuid))
        })?;
        let data = STANDARD
            .decode(encoded)
            .map_err(|e| CodecError::Crypto(format!("Item {}: {}", item.uuid, e)))?;

        if data.len() < NONCE_SIZE {
            return Err(CodecError::Crypto(format!(
                "Item {}: data too short to contain nonce",
                item.uuid
            )));
        }

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: item.uuid.as_bytes(),
                },
            )
            .map_err(|_| CodecError::Crypto(format!("Item {}: decryption failed", item.uuid)))
    }

    fn encrypt(&self, item: &Item, plaintext: &[u8]) -> std::result::Result<String, CodecError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: item.uuid.as_bytes(),
                },
            )
            .map_err(|e| CodecError::Crypto(format!("Item {}: encryption failed: {}", item.uuid, e)))?;

        let mut data = nonce_bytes.to_vec();
        data.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", PAYLOAD_PREFIX, STANDARD.encode(data)))
    }
}

#[async_trait]
impl RemoteSession for FolderRemote {
    async fn submit_update(&self, item: &Item) -> Result<Ack> {
        let mut state = self.load_existing().await?;

        state.seq += 1;
        let now = Utc::now();
        let created_at = state
            .items
            .get(&item.uuid)
            .and_then(|stored| stored.item.created_at)
            .or(item.created_at)
            .unwrap_or(now);
        let stored = Item {
            created_at: Some(created_at),
            updated_at: Some(now),
            ..item.clone()
        };
        state.items.insert(
            item.uuid,
            StoredItem {
                seq: state.seq,
                item: stored,
            },
        );
        self.save(&state).await?;

        let mut submitted = self.submitted();
        if !submitted.contains(&item.uuid) {
            submitted.push(item.uuid);
        }

        debug!("Stored item {} at seq {}", item.uuid, state.seq);
        Ok(Ack {
            uuid: item.uuid,
            updated_at: Some(now),
        })
    }

    async fn exchange(&self, cursor: Option<&str>) -> Result<ExchangeResult> {
        let since = match cursor {
            Some(c) => c
                .parse::<u64>()
                .map_err(|_| RemoteError::Protocol(format!("Invalid cursor: {}", c)))?,
            None => 0,
        };

        let state = self.load_existing().await?;
        let submitted = std::mem::take(&mut *self.submitted());

        let mut changed: Vec<&StoredItem> = state
            .items
            .values()
            .filter(|stored| stored.seq > since && !submitted.contains(&stored.item.uuid))
            .collect();
        changed.sort_by_key(|stored| stored.seq);

        Ok(ExchangeResult {
            retrieved: changed.into_iter().map(|stored| stored.item.clone()).collect(),
            saved: submitted
                .iter()
                .filter_map(|uuid| state.items.get(uuid).map(|stored| stored.item.clone()))
                .collect(),
            cursor: state.seq.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::item::NOTE_CONTENT_TYPE;
    use mirror_core::note::{self, Note};
    use tempfile::TempDir;

    const EMAIL: &str = "user@example.com";
    const PASSWORD: &str = "correct horse";

    #[tokio::test]
    async fn test_sign_in_creates_account() {
        let dir = TempDir::new().unwrap();

        FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();

        assert!(dir.path().join(SERVER_FILE).is_file());
        // Same credentials sign in again
        FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_credentials_are_unauthorized() {
        let dir = TempDir::new().unwrap();
        FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();

        let wrong_password = FolderRemote::sign_in(dir.path(), EMAIL, "nope").await;
        let wrong_email = FolderRemote::sign_in(dir.path(), "other@example.com", PASSWORD).await;

        assert!(matches!(wrong_password, Err(RemoteError::Unauthorized(_))));
        assert!(matches!(wrong_email, Err(RemoteError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_cipher_roundtrip_and_tamper_detection() {
        let dir = TempDir::new().unwrap();
        let remote = FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();
        let mut item = Item::new(NOTE_CONTENT_TYPE);

        item.content = remote.encrypt(&item, b"secret").unwrap();
        assert!(item.content.starts_with(PAYLOAD_PREFIX));
        assert!(!item.content.contains("secret"));
        assert_eq!(remote.decrypt(&item).unwrap(), b"secret");

        // Content copied onto another item does not decrypt
        let mut moved = Item::new(NOTE_CONTENT_TYPE);
        moved.content = item.content.clone();
        assert!(matches!(remote.decrypt(&moved), Err(CodecError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_sessions_share_notes_through_the_folder() {
        let dir = TempDir::new().unwrap();
        let laptop = FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();
        let desktop = FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();

        let mut note = Note::new("Todo", "buy milk");
        let item = note::new_item(&laptop, &mut note).unwrap();
        let ack = laptop.submit_update(&item).await.unwrap();
        assert_eq!(ack.uuid, item.uuid);

        let pulled = desktop.exchange(None).await.unwrap();
        assert_eq!(pulled.cursor, "1");
        assert!(pulled.saved.is_empty());
        assert_eq!(pulled.retrieved.len(), 1);
        assert_eq!(pulled.retrieved[0].updated_at, ack.updated_at);
        assert_eq!(note::decrypt(&desktop, &pulled.retrieved[0]).unwrap(), note);

        let own = laptop.exchange(None).await.unwrap();
        assert!(own.retrieved.is_empty());
        assert_eq!(own.saved.len(), 1);

        let again = desktop.exchange(Some(&pulled.cursor)).await.unwrap();
        assert!(again.retrieved.is_empty());
    }

    #[tokio::test]
    async fn test_resubmit_keeps_creation_time() {
        let dir = TempDir::new().unwrap();
        let remote = FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();
        let item = Item::new(NOTE_CONTENT_TYPE);

        remote.submit_update(&item).await.unwrap();
        let first = remote.exchange(None).await.unwrap().saved.remove(0);
        remote.submit_update(&item).await.unwrap();
        let second = remote.exchange(Some("1")).await.unwrap();

        assert_eq!(second.cursor, "2");
        assert_eq!(second.saved[0].created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_invalid_cursor_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let remote = FolderRemote::sign_in(dir.path(), EMAIL, PASSWORD).await.unwrap();

        assert!(matches!(
            remote.exchange(Some("not-a-number")).await,
            Err(RemoteError::Protocol(_))
        ));
    }
}
