//! API-key store (C14): Argon2id-hashed-at-rest keys, plaintext returned
//! exactly once at creation, grounded in `acton-service::auth::password`
//! and `acton-service::auth::api_keys`.

use std::collections::HashMap;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AuthError;

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub prefix: String,
    pub key_hash: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

fn hash_key(plaintext: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_key(plaintext: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Hash(e.to_string()))?;
    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Hash(e.to_string())),
    }
}

/// Generates keys in the form `{prefix}_{random-base32}`, 192 bits of
/// entropy, matching the teacher's `ApiKeyGenerator`.
fn generate_plaintext(prefix: &str) -> String {
    let random_bytes: [u8; 24] = rand::random();
    format!("{prefix}_{}", base32_encode(&random_bytes))
}

fn base32_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut result = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer = 0u64;
    let mut bits = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | byte as u64;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            result.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        result.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    result
}

/// In-process store of API keys. Durability is out of scope here (the
/// same deviation as `gateway-discussion::templates`): wiring this to a
/// `StateStore`-backed table is left to `gateway-cli` if persistence
/// across restarts is required.
#[derive(Default)]
pub struct ApiKeyStore {
    keys: RwLock<HashMap<Uuid, ApiKey>>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a key and returns its plaintext value. The plaintext is
    /// never stored or retrievable again.
    pub async fn create(&self, name: impl Into<String>, prefix: &str) -> Result<(Uuid, String), AuthError> {
        let plaintext = generate_plaintext(prefix);
        let key_hash = hash_key(&plaintext)?;
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: name.into(),
            prefix: prefix.to_string(),
            key_hash,
            enabled: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        let id = key.id;
        self.keys.write().await.insert(id, key);
        Ok((id, plaintext))
    }

    /// Verifies a presented plaintext key against every enabled stored
    /// hash. Bumps `last_used_at` on a match.
    pub async fn verify(&self, plaintext: &str) -> Result<ApiKey, AuthError> {
        let mut keys = self.keys.write().await;
        for key in keys.values_mut() {
            if !key.enabled {
                continue;
            }
            if verify_key(plaintext, &key.key_hash)? {
                key.last_used_at = Some(Utc::now());
                return Ok(key.clone());
            }
        }
        Err(AuthError::InvalidKey)
    }

    pub async fn list(&self) -> Vec<ApiKey> {
        self.keys.read().await.values().cloned().collect()
    }

    pub async fn enable(&self, id: Uuid) -> Result<(), AuthError> {
        let mut keys = self.keys.write().await;
        let key = keys.get_mut(&id).ok_or(AuthError::NotFound)?;
        key.enabled = true;
        Ok(())
    }

    pub async fn disable(&self, id: Uuid) -> Result<(), AuthError> {
        let mut keys = self.keys.write().await;
        let key = keys.get_mut(&id).ok_or(AuthError::NotFound)?;
        key.enabled = false;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        self.keys.write().await.remove(&id).ok_or(AuthError::NotFound)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_verify_roundtrips() {
        let store = ApiKeyStore::new();
        let (_id, plaintext) = store.create("ci-bot", "sk_live").await.unwrap();
        assert!(plaintext.starts_with("sk_live_"));
        let verified = store.verify(&plaintext).await.unwrap();
        assert_eq!(verified.name, "ci-bot");
        assert!(verified.last_used_at.is_some());
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let store = ApiKeyStore::new();
        store.create("ci-bot", "sk_live").await.unwrap();
        let result = store.verify("sk_live_not_a_real_key").await;
        assert!(matches!(result, Err(AuthError::InvalidKey)));
    }

    #[tokio::test]
    async fn disabled_key_is_rejected() {
        let store = ApiKeyStore::new();
        let (id, plaintext) = store.create("ci-bot", "sk_live").await.unwrap();
        store.disable(id).await.unwrap();
        let result = store.verify(&plaintext).await;
        assert!(matches!(result, Err(AuthError::InvalidKey)));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = ApiKeyStore::new();
        let (id, _plaintext) = store.create("ci-bot", "sk_live").await.unwrap();
        store.delete(id).await.unwrap();
        assert!(store.list().await.is_empty());
    }
}
