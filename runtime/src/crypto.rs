//! At-rest encryption for queued records.
//!
//! Records are sealed with AES-256-GCM under a per-session key before they
//! reach the durable store. The key is generated (or loaded from its
//! [`KeySlot`]) once and cached; the slot lets a reload within the same
//! session recover the key instead of orphaning earlier ciphertexts.
//!
//! Failures never surface as errors: [`SessionKeyring::encrypt`] returns
//! `None` so callers store plaintext, and [`SessionKeyring::decrypt`] returns
//! `None` so an undecryptable record is treated as absent.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

/// Current envelope format.
pub const ENVELOPE_VERSION: u32 = 1;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// A sealed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    /// Base64 nonce
    pub iv: String,
    /// Base64 ciphertext including the authentication tag
    pub ciphertext: String,
}

/// Session-scoped storage for serialized key material.
#[async_trait]
pub trait KeySlot: Send + Sync {
    async fn load(&self) -> io::Result<Option<String>>;
    async fn save(&self, material: &str) -> io::Result<()>;
    async fn clear(&self) -> io::Result<()>;
}

/// Key slot that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryKeySlot {
    material: Mutex<Option<Zeroizing<String>>>,
}

impl MemoryKeySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeySlot for MemoryKeySlot {
    async fn load(&self) -> io::Result<Option<String>> {
        Ok(self.material.lock().await.as_ref().map(|m| m.as_str().to_owned()))
    }

    async fn save(&self, material: &str) -> io::Result<()> {
        *self.material.lock().await = Some(Zeroizing::new(material.to_string()));
        Ok(())
    }

    async fn clear(&self) -> io::Result<()> {
        self.material.lock().await.take();
        Ok(())
    }
}

/// Key slot backed by a file, typically under a per-session runtime directory.
#[derive(Debug, Clone)]
pub struct FileKeySlot {
    path: PathBuf,
}

impl FileKeySlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeySlot for FileKeySlot {
    async fn load(&self) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(material) => Ok(Some(material.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, material: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, material).await
    }

    async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Holds the session key and seals/unseals records with it.
pub struct SessionKeyring {
    enabled: bool,
    slot: Arc<dyn KeySlot>,
    cipher: Mutex<Option<Aes256Gcm>>,
}

impl SessionKeyring {
    pub fn new(slot: Arc<dyn KeySlot>) -> Self {
        Self {
            enabled: true,
            slot,
            cipher: Mutex::new(None),
        }
    }

    /// A keyring that never encrypts; every record is stored as plaintext.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            slot: Arc::new(MemoryKeySlot::new()),
            cipher: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Seal `value`. Returns `None` when encryption is unavailable.
    pub async fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Option<Envelope> {
        if !self.enabled {
            return None;
        }
        let cipher = self.session_cipher(true).await?;
        let plaintext = match serde_json::to_vec(value) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize record for encryption");
                return None;
            }
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        match cipher.encrypt(&nonce, plaintext.as_slice()) {
            Ok(ciphertext) => Some(Envelope {
                version: ENVELOPE_VERSION,
                iv: STANDARD.encode(nonce),
                ciphertext: STANDARD.encode(ciphertext),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Encryption failed, storing plaintext");
                None
            }
        }
    }

    /// Unseal an envelope. Returns `None` on any failure.
    pub async fn decrypt<T: DeserializeOwned>(&self, envelope: &Envelope) -> Option<T> {
        if envelope.version != ENVELOPE_VERSION {
            tracing::warn!(version = envelope.version, "Unsupported envelope version");
            return None;
        }
        let iv = STANDARD.decode(&envelope.iv).ok()?;
        if iv.len() != NONCE_LEN {
            tracing::warn!(len = iv.len(), "Envelope nonce has wrong length");
            return None;
        }
        let ciphertext = STANDARD.decode(&envelope.ciphertext).ok()?;

        let cipher = self.session_cipher(false).await?;
        let plaintext = match cipher.decrypt(Nonce::from_slice(&iv), ciphertext.as_slice()) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(_) => {
                tracing::warn!("Failed to decrypt record, treating it as absent");
                return None;
            }
        };
        serde_json::from_slice(&plaintext).ok()
    }

    /// Drop the cached key and its persisted material.
    ///
    /// The next encryption generates a fresh key; anything sealed under the
    /// old one becomes unrecoverable.
    pub async fn clear_session_key(&self) {
        self.cipher.lock().await.take();
        if let Err(e) = self.slot.clear().await {
            tracing::warn!(error = %e, "Failed to clear key slot");
        }
        tracing::info!("Session key cleared");
    }

    async fn session_cipher(&self, generate: bool) -> Option<Aes256Gcm> {
        let mut cached = self.cipher.lock().await;
        if let Some(cipher) = cached.as_ref() {
            return Some(cipher.clone());
        }

        match self.slot.load().await {
            Ok(Some(material)) => match decode_key(&material) {
                Some(cipher) => {
                    *cached = Some(cipher.clone());
                    return Some(cipher);
                }
                None => tracing::warn!("Stored session key is malformed, discarding it"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read key slot"),
        }

        if !generate {
            return None;
        }

        let key = Aes256Gcm::generate_key(&mut OsRng);
        let material = Zeroizing::new(STANDARD.encode(key.as_slice()));
        if let Err(e) = self.slot.save(&material).await {
            // The key still works for this process; it just won't survive a reload.
            tracing::warn!(error = %e, "Failed to persist session key");
        }
        let cipher = Aes256Gcm::new(&key);
        *cached = Some(cipher.clone());
        tracing::debug!("Generated new session key");
        Some(cipher)
    }
}

fn decode_key(material: &str) -> Option<Aes256Gcm> {
    let bytes = Zeroizing::new(STANDARD.decode(material.trim()).ok()?);
    if bytes.len() != KEY_LEN {
        return None;
    }
    Some(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)))
}
