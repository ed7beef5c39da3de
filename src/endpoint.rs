//! backend address resolution: override > saved > origin default.

use std::fmt;

use crate::store::{KvStore, StoreError};

/// base origin of the chat backend (scheme + host[:port]).
///
/// kept as entered (trimmed); separators are only normalized when joining a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `base` + `path` with exactly one `/` between them, however many trailing
    /// slashes the base carries.
    pub fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.0.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// pure resolution rule. blank candidates count as missing.
pub fn resolve_endpoint(override_: Option<&str>, saved: Option<&str>, origin: &str) -> Endpoint {
    let picked = non_blank(override_)
        .or_else(|| non_blank(saved))
        .unwrap_or(origin);
    Endpoint::new(picked)
}

/// reads and writes the user-saved endpoint in a `KvStore`.
pub struct EndpointResolver<'a> {
    store: &'a dyn KvStore,
    key: &'a str,
}

impl<'a> EndpointResolver<'a> {
    pub fn new(store: &'a dyn KvStore, key: &'a str) -> Self {
        Self { store, key }
    }

    pub fn saved(&self) -> Option<String> {
        self.store.get(self.key)
    }

    pub fn resolve(&self, override_: Option<&str>, origin: &str) -> Endpoint {
        let saved = self.saved();
        resolve_endpoint(override_, saved.as_deref(), origin)
    }

    /// persist a user edit. blank input is ignored (`Ok(None)`), the store is not touched.
    pub fn save(&self, raw: &str) -> Result<Option<Endpoint>, StoreError> {
        let value = raw.trim();
        if value.is_empty() {
            return Ok(None);
        }
        self.store.set(self.key, value)?;
        Ok(Some(Endpoint::new(value)))
    }
}
