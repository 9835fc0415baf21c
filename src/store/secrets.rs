use super::{format_ts, sql_error, Store, StoreError};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

pub const GITHUB_TOKEN_KEY: &str = "github_token";

impl Store {
    /// Seals `plaintext` with the master key, bound to `key` as associated
    /// data, and upserts the ciphertext. Plaintext never reaches SQLite.
    pub fn set_secret(&self, key: &str, plaintext: &str) -> Result<(), StoreError> {
        let sealed = self
            .master_key()
            .seal(key, plaintext.as_bytes())
            .map_err(|source| StoreError::Seal {
                key: key.to_string(),
                source,
            })?;
        let now = format_ts(&Utc::now());
        self.write(|conn| {
            conn.execute(
                "
                INSERT INTO secrets (key, ciphertext, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET ciphertext = excluded.ciphertext, updated_at = excluded.updated_at
                ",
                params![key, sealed, now],
            )
            .map_err(sql_error)?;
            Ok(())
        })
    }

    pub fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(sealed) = self.get_secret_blob(key)? else {
            return Ok(None);
        };
        let plaintext = self
            .master_key()
            .open(key, &sealed)
            .map_err(|_| StoreError::Decrypt {
                key: key.to_string(),
            })?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| StoreError::Decrypt {
                key: key.to_string(),
            })
    }

    pub fn get_secret_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT ciphertext FROM secrets WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(sql_error)
        })
    }

    pub fn save_github_token(&self, token: &str) -> Result<(), StoreError> {
        self.set_secret(GITHUB_TOKEN_KEY, token.trim())
    }

    pub fn github_token(&self) -> Result<Option<String>, StoreError> {
        self.get_secret(GITHUB_TOKEN_KEY)
    }

    /// Presence only; does not decrypt.
    pub fn has_github_token(&self) -> Result<bool, StoreError> {
        Ok(self.get_secret_blob(GITHUB_TOKEN_KEY)?.is_some())
    }
}
