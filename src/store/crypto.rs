use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const MASTER_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to read master key {path}: {source}")]
    ReadKey {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write master key {path}: {source}")]
    WriteKey {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("master key {path} has {len} bytes; expected {MASTER_KEY_LEN}")]
    InvalidKeyLength { path: String, len: usize },
    #[error("system randomness unavailable: {0}")]
    Random(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("ciphertext is truncated or was sealed for a different key name")]
    Decrypt,
}

/// Holds the 32-byte AES-256-GCM key that seals every row in `secrets`.
pub struct MasterKey {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8; MASTER_KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(bytes)),
        }
    }

    /// Reads the key file, creating it owner-only (0600) on first use.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            let raw = fs::read(path).map_err(|source| CryptoError::ReadKey {
                path: path.display().to_string(),
                source,
            })?;
            let bytes: [u8; MASTER_KEY_LEN] =
                raw.as_slice()
                    .try_into()
                    .map_err(|_| CryptoError::InvalidKeyLength {
                        path: path.display().to_string(),
                        len: raw.len(),
                    })?;
            return Ok(Self::from_bytes(&bytes));
        }

        let mut bytes = [0u8; MASTER_KEY_LEN];
        getrandom::getrandom(&mut bytes).map_err(|err| CryptoError::Random(err.to_string()))?;
        write_owner_only(path, &bytes).map_err(|source| CryptoError::WriteKey {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Returns `nonce ‖ tag ‖ ciphertext`, authenticated against `key_name`.
    pub fn seal(&self, key_name: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce).map_err(|err| CryptoError::Random(err.to_string()))?;

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), key_name.as_bytes(), &mut buffer)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(tag.as_slice());
        sealed.extend_from_slice(&buffer);
        Ok(sealed)
    }

    pub fn open(&self, key_name: &str, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, rest) = sealed.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                key_name.as_bytes(),
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(buffer)
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
