//! wire contract with the core api.
//!
//! - `POST {endpoint}/v1/chat` with `{"channel","user_id","text"}` -> `{"parts":[...]}`
//! - `GET {endpoint}/healthz` -> `{"status":"ok",...}`
//!
//! on native the http call is ureq (blocking) pushed onto tokio's blocking pool;
//! on wasm it is gloo-net (`fetch`).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChatClientConfig;
use crate::endpoint::Endpoint;

pub const CHAT_PATH: &str = "/v1/chat";
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub channel: String,
    pub user_id: String,
    pub text: String,
}

/// `parts` may be missing or `null`; both read as "no parts".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub parts: Option<Vec<String>>,
    /// llm provider name, reported by some backends. informational only.
    #[serde(default)]
    pub provider: Option<String>,
}

impl ChatResponse {
    pub fn with_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: Some(parts.into_iter().map(Into::into).collect()),
            provider: None,
        }
    }

    pub fn parts(&self) -> &[String] {
        self.parts.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub orch_initialized: Option<bool>,
    #[serde(default)]
    pub hist_initialized: Option<bool>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// every way an exchange can fail. the display string is what ends up in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// dns, refused connection, reset, timeout...
    #[error("{0}")]
    Network(String),

    #[error("{status} {body}")]
    Status { status: u16, body: String },

    /// 2xx with a body that isn't the expected json.
    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Encode(String),

    /// the task driving the exchange died before it produced an outcome.
    #[error("exchange aborted: {0}")]
    Aborted(String),
}

fn check_status(status: u16, body: &str) -> Result<(), TransportError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(TransportError::Status { status, body: body.to_string() })
    }
}

fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, TransportError> {
    serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))
}

/// status check + body parse for `/v1/chat`. a literal `null` body is an empty reply.
pub fn decode_chat_response(status: u16, body: &str) -> Result<ChatResponse, TransportError> {
    check_status(status, body)?;
    decode_json::<Option<ChatResponse>>(body).map(Option::unwrap_or_default)
}

pub fn decode_health(status: u16, body: &str) -> Result<HealthStatus, TransportError> {
    check_status(status, body)?;
    decode_json(body)
}

/// one request/response exchange with the backend.
///
/// implementations resolve exactly once per call; they never retry.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &Endpoint, request: &ChatRequest) -> Result<ChatResponse, TransportError>;

    async fn health(&self, endpoint: &Endpoint) -> Result<HealthStatus, TransportError>;
}

// ---------------------- native: ureq ----------------------

/// http transport. needs a tokio runtime on native (the plugin provides `TokioRt`).
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpTransport {
    pub fn new(config: &ChatClientConfig) -> Self {
        // non-2xx must come back as a response so the body can be shown to the user
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(config.request_timeout)
            .build();
        Self { agent: ureq::Agent::new_with_config(agent_config) }
    }

    async fn call(&self, url: String, body: Option<String>) -> Result<(u16, String), TransportError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || blocking_call(&agent, &url, body))
            .await
            .map_err(|e| TransportError::Aborted(e.to_string()))?
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn blocking_call(agent: &ureq::Agent, url: &str, body: Option<String>) -> Result<(u16, String), TransportError> {
    let net = |e: ureq::Error| TransportError::Network(e.to_string());
    let res = match body {
        Some(json) => agent
            .post(url)
            .header("Content-Type", "application/json")
            .send(json.as_str())
            .map_err(net)?,
        None => agent.get(url).header("Accept", "application/json").call().map_err(net)?,
    };
    let status = res.status().as_u16();
    let text = res.into_body().read_to_string().map_err(net)?;
    Ok((status, text))
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &Endpoint, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let body = serde_json::to_string(request).map_err(|e| TransportError::Encode(e.to_string()))?;
        let (status, text) = self.call(endpoint.join(CHAT_PATH), Some(body)).await?;
        decode_chat_response(status, &text)
    }

    async fn health(&self, endpoint: &Endpoint) -> Result<HealthStatus, TransportError> {
        let (status, text) = self.call(endpoint.join(HEALTH_PATH), None).await?;
        decode_health(status, &text)
    }
}

// ---------------------- wasm: gloo-net ----------------------

/// http transport over `fetch`. `request_timeout` is not applied here.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Default)]
pub struct HttpTransport;

#[cfg(target_arch = "wasm32")]
impl HttpTransport {
    pub fn new(_config: &ChatClientConfig) -> Self {
        Self
    }
}

#[cfg(target_arch = "wasm32")]
fn net(e: gloo_net::Error) -> TransportError {
    TransportError::Network(e.to_string())
}

#[cfg(target_arch = "wasm32")]
#[async_trait(?Send)]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &Endpoint, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        use gloo_net::http::Request;

        let body = serde_json::to_string(request).map_err(|e| TransportError::Encode(e.to_string()))?;
        let resp = Request::post(&endpoint.join(CHAT_PATH))
            .header("Content-Type", "application/json")
            .body(body)
            .map_err(net)?
            .send()
            .await
            .map_err(net)?;
        let status = resp.status();
        let text = resp.text().await.map_err(net)?;
        decode_chat_response(status, &text)
    }

    async fn health(&self, endpoint: &Endpoint) -> Result<HealthStatus, TransportError> {
        use gloo_net::http::Request;

        let resp = Request::get(&endpoint.join(HEALTH_PATH))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(net)?;
        let status = resp.status();
        let text = resp.text().await.map_err(net)?;
        decode_health(status, &text)
    }
}

/// in-process stand-in for the backend. replies are consumed in order; every
/// request is recorded.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<ChatResponse, TransportError>>>,
        pub(crate) seen: Mutex<Vec<(Endpoint, ChatRequest)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn replying(replies: impl IntoIterator<Item = Result<ChatResponse, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                seen: Mutex::default(),
            }
        }

        pub(crate) fn requests(&self) -> Vec<(Endpoint, ChatRequest)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    impl Transport for ScriptedTransport {
        async fn send(&self, endpoint: &Endpoint, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
            self.seen.lock().unwrap().push((endpoint.clone(), request.clone()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("no scripted reply".into())))
        }

        async fn health(&self, _endpoint: &Endpoint) -> Result<HealthStatus, TransportError> {
            Ok(HealthStatus { status: "ok".into(), ..Default::default() })
        }
    }
}
