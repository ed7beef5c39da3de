//! anonymous client id, created once per store and reused forever after.

use std::fmt;

use crate::error::ChatError;
use crate::store::KvStore;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// opaque id the backend uses to tell anonymous clients apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `len` characters of `[0-9a-z]`. collision-resistant enough for one deployment,
/// not a secret.
pub fn random_suffix(len: usize) -> Result<String, ChatError> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(|e| ChatError::Entropy(e.to_string()))?;
    Ok(bytes
        .into_iter()
        .map(|b| ALPHABET[b as usize % ALPHABET.len()] as char)
        .collect())
}

pub struct IdentityProvider<'a> {
    store: &'a dyn KvStore,
    key: &'a str,
    prefix: &'a str,
    suffix_len: usize,
}

impl<'a> IdentityProvider<'a> {
    pub fn new(store: &'a dyn KvStore, key: &'a str, prefix: &'a str, suffix_len: usize) -> Self {
        Self { store, key, prefix, suffix_len }
    }

    pub fn get_or_create(&self) -> Result<ClientIdentity, ChatError> {
        if let Some(existing) = self.store.get(self.key).filter(|v| !v.is_empty()) {
            return Ok(ClientIdentity(existing));
        }

        let id = format!("{}{}", self.prefix, random_suffix(self.suffix_len)?);
        match self.store.set(self.key, &id) {
            Ok(()) => bevy::log::info!(target: "bevy_web_chat", "created client id {}", id),
            // still usable for this session; the next load will mint another one
            Err(err) => bevy::log::warn!(
                target: "bevy_web_chat",
                "client id {} not persisted: {}", id, err
            ),
        }
        Ok(ClientIdentity(id))
    }
}
