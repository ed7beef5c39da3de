use std::time::Duration;

use bevy::prelude::Resource;

/// client settings shared by every chat session.
///
/// defaults match the core api web client: channel `web`, endpoint saved under
/// `CORE_API_BASE`, client id under `WEB_USER_ID` with a `web-` prefix.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct ChatClientConfig {
    /// fixed channel tag sent with every request.
    pub channel: String,
    /// store key of the user-saved endpoint.
    pub endpoint_key: String,
    /// store key of the generated client id.
    pub identity_key: String,
    pub identity_prefix: String,
    pub identity_suffix_len: usize,
    /// fallback endpoint when neither an override nor a saved value exists.
    /// in the browser this is the page origin.
    pub default_origin: String,
    /// explicit endpoint that wins over anything saved (e.g. `?api=` in the browser).
    pub endpoint_override: Option<String>,
    /// `None` waits forever. native only; fetch on wasm has no timeout.
    pub request_timeout: Option<Duration>,
    pub empty_reply_notice: String,
    pub failure_prefix: String,
    pub endpoint_saved_prefix: String,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            channel: "web".to_string(),
            endpoint_key: "CORE_API_BASE".to_string(),
            identity_key: "WEB_USER_ID".to_string(),
            identity_prefix: "web-".to_string(),
            identity_suffix_len: 8,
            default_origin: "http://localhost:8000".to_string(),
            endpoint_override: None,
            request_timeout: None,
            empty_reply_notice: "Empty response from Core API".to_string(),
            failure_prefix: "Error: ".to_string(),
            endpoint_saved_prefix: "API changed: ".to_string(),
        }
    }
}

impl ChatClientConfig {
    /// defaults overlaid with `CORE_API_BASE`, `CORE_API_ORIGIN` and `CORE_API_TIMEOUT_SECS`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let non_blank = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(base) = non_blank("CORE_API_BASE") {
            cfg.endpoint_override = Some(base);
        }
        if let Some(origin) = non_blank("CORE_API_ORIGIN") {
            cfg.default_origin = origin;
        }
        if let Some(raw) = non_blank("CORE_API_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(0) => cfg.request_timeout = None,
                Ok(secs) => cfg.request_timeout = Some(Duration::from_secs(secs)),
                Err(_) => bevy::log::warn!(
                    target: "bevy_web_chat",
                    "ignoring CORE_API_TIMEOUT_SECS='{}' (not a number of seconds)", raw
                ),
            }
        }
        cfg
    }

    pub fn with_override(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.default_origin = origin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        let cfg = ChatClientConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, ChatClientConfig::default());
        assert_eq!(cfg.channel, "web");
        assert_eq!(cfg.request_timeout, None);
    }

    #[test]
    fn environment_overrides() {
        let cfg = ChatClientConfig::from_lookup(lookup(&[
            ("CORE_API_BASE", " http://core:8001 "),
            ("CORE_API_ORIGIN", "http://example.test"),
            ("CORE_API_TIMEOUT_SECS", "30"),
        ]));
        assert_eq!(cfg.endpoint_override.as_deref(), Some("http://core:8001"));
        assert_eq!(cfg.default_origin, "http://example.test");
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn blank_or_bad_values_are_ignored() {
        let cfg = ChatClientConfig::from_lookup(lookup(&[
            ("CORE_API_BASE", "   "),
            ("CORE_API_TIMEOUT_SECS", "soon"),
        ]));
        assert_eq!(cfg.endpoint_override, None);
        assert_eq!(cfg.request_timeout, None);
    }
}
