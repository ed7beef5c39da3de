//! chat session controller: transcript + the Idle/Awaiting send flow.
//!
//! the controller never touches a ui or the network itself. it hands out a
//! `ChatRequest` on submit, takes the outcome back in `settle`, and queues
//! `ViewUpdate`s that a delivery context drains with `flush`:
//!
//! - bevy: `WebChatPlugin` forwards them as `ChatViewEvt`s
//! - browser page: `web::mount` writes them into the dom
//!
//! one request in flight at most: `submit` disables sending before it returns,
//! and only `settle` enables it again.

use bevy::prelude::Component;

use crate::config::ChatClientConfig;
use crate::endpoint::{Endpoint, EndpointResolver};
use crate::error::ChatError;
use crate::identity::{ClientIdentity, IdentityProvider};
use crate::store::KvStore;
use crate::transcript::{Role, Transcript, Turn};
use crate::transport::{ChatRequest, ChatResponse, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// input enabled, nothing in flight.
    #[default]
    Idle,
    /// input disabled, one request in flight.
    Awaiting,
}

/// a change the ui has to reflect, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Turn(Turn),
    Endpoint(Endpoint),
    ClearPrompt,
    SendEnabled(bool),
    FocusPrompt,
}

/// rendering shim of a delivery context.
///
/// turns must be rendered as plain text and the view kept scrolled to the latest one.
pub trait ChatView {
    fn append_turn(&mut self, turn: &Turn);
    fn show_endpoint(&mut self, endpoint: &Endpoint);
    fn clear_prompt(&mut self);
    fn set_send_enabled(&mut self, enabled: bool);
    fn focus_prompt(&mut self);
}

/// records updates instead of rendering them.
impl ChatView for Vec<ViewUpdate> {
    fn append_turn(&mut self, turn: &Turn) {
        self.push(ViewUpdate::Turn(turn.clone()));
    }
    fn show_endpoint(&mut self, endpoint: &Endpoint) {
        self.push(ViewUpdate::Endpoint(endpoint.clone()));
    }
    fn clear_prompt(&mut self) {
        self.push(ViewUpdate::ClearPrompt);
    }
    fn set_send_enabled(&mut self, enabled: bool) {
        self.push(ViewUpdate::SendEnabled(enabled));
    }
    fn focus_prompt(&mut self) {
        self.push(ViewUpdate::FocusPrompt);
    }
}

#[derive(Component, Debug, Clone)]
pub struct ChatController {
    config: ChatClientConfig,
    endpoint: Endpoint,
    identity: ClientIdentity,
    transcript: Transcript,
    state: SessionState,
    send_enabled: bool,
    pending: Vec<ViewUpdate>,
}

impl ChatController {
    /// resolve endpoint + identity from `store` and start Idle.
    pub fn bootstrap(config: &ChatClientConfig, store: &dyn KvStore) -> Result<Self, ChatError> {
        let endpoint = EndpointResolver::new(store, &config.endpoint_key)
            .resolve(config.endpoint_override.as_deref(), &config.default_origin);
        let identity = IdentityProvider::new(
            store,
            &config.identity_key,
            &config.identity_prefix,
            config.identity_suffix_len,
        )
        .get_or_create()?;
        bevy::log::info!(
            target: "bevy_web_chat",
            "chat session ready: endpoint={} client={}", endpoint, identity
        );
        Ok(Self::new(config.clone(), endpoint, identity))
    }

    pub fn new(config: ChatClientConfig, endpoint: Endpoint, identity: ClientIdentity) -> Self {
        let pending = vec![ViewUpdate::Endpoint(endpoint.clone()), ViewUpdate::SendEnabled(true)];
        Self {
            config,
            endpoint,
            identity,
            transcript: Transcript::default(),
            state: SessionState::Idle,
            send_enabled: true,
            pending,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn send_enabled(&self) -> bool {
        self.send_enabled
    }

    fn append(&mut self, role: Role, text: impl Into<String>) {
        let turn = self.transcript.push(role, text).clone();
        self.pending.push(ViewUpdate::Turn(turn));
    }

    /// start an exchange with the composer text.
    ///
    /// returns the request to send, or `None` if the text is blank or a request is
    /// already in flight (nothing changes in either case).
    pub fn submit(&mut self, raw: &str) -> Option<ChatRequest> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        if !self.send_enabled {
            bevy::log::debug!(target: "bevy_web_chat", "submit ignored: a request is in flight");
            return None;
        }

        self.append(Role::User, text);
        self.pending.push(ViewUpdate::ClearPrompt);
        self.send_enabled = false;
        self.pending.push(ViewUpdate::SendEnabled(false));
        self.state = SessionState::Awaiting;

        Some(ChatRequest {
            channel: self.config.channel.clone(),
            user_id: self.identity.as_str().to_string(),
            text: text.to_string(),
        })
    }

    /// finish the in-flight exchange, whatever its outcome.
    /// returns `false` (and changes nothing) when no exchange is in flight.
    pub fn settle(&mut self, outcome: Result<ChatResponse, TransportError>) -> bool {
        if self.state != SessionState::Awaiting {
            bevy::log::warn!(target: "bevy_web_chat", "settle without a request in flight, outcome dropped");
            return false;
        }

        match outcome {
            Ok(resp) => {
                let parts = resp.parts();
                bevy::log::debug!(
                    target: "bevy_web_chat",
                    "reply: parts={} provider={}",
                    parts.len(),
                    resp.provider.as_deref().unwrap_or("-")
                );
                if parts.is_empty() {
                    let notice = self.config.empty_reply_notice.clone();
                    self.append(Role::Assistant, notice);
                } else {
                    for part in parts {
                        self.append(Role::Assistant, part.clone());
                    }
                }
            }
            Err(err) => {
                bevy::log::warn!(target: "bevy_web_chat", "exchange failed: {}", err);
                let text = format!("{}{}", self.config.failure_prefix, err);
                self.append(Role::Assistant, text);
            }
        }

        self.state = SessionState::Idle;
        self.send_enabled = true;
        self.pending.push(ViewUpdate::SendEnabled(true));
        self.pending.push(ViewUpdate::FocusPrompt);
        true
    }

    /// persist a user-entered endpoint and switch to it. blank input is ignored.
    pub fn save_endpoint(&mut self, store: &dyn KvStore, raw: &str) -> bool {
        let resolver = EndpointResolver::new(store, &self.config.endpoint_key);
        let endpoint = match resolver.save(raw) {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return false,
            Err(err) => {
                // keep going: the new endpoint still applies to this session
                bevy::log::warn!(target: "bevy_web_chat", "endpoint not persisted: {}", err);
                Endpoint::new(raw)
            }
        };

        bevy::log::info!(target: "bevy_web_chat", "endpoint -> {}", endpoint);
        self.endpoint = endpoint.clone();
        self.pending.push(ViewUpdate::Endpoint(endpoint.clone()));
        let ack = format!("{}{}", self.config.endpoint_saved_prefix, endpoint);
        self.append(Role::System, ack);
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// hand queued updates to `view`, oldest first.
    pub fn flush<V: ChatView + ?Sized>(&mut self, view: &mut V) {
        for update in self.pending.drain(..) {
            match update {
                ViewUpdate::Turn(turn) => view.append_turn(&turn),
                ViewUpdate::Endpoint(endpoint) => view.show_endpoint(&endpoint),
                ViewUpdate::ClearPrompt => view.clear_prompt(),
                ViewUpdate::SendEnabled(enabled) => view.set_send_enabled(enabled),
                ViewUpdate::FocusPrompt => view.focus_prompt(),
            }
        }
    }

    /// pending updates as a vec, for contexts that forward them elsewhere.
    pub fn take_updates(&mut self) -> Vec<ViewUpdate> {
        let mut out = Vec::new();
        self.flush(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use crate::transport::Transport;
    use crate::transport::mock::ScriptedTransport;
    use pretty_assertions::assert_eq;

    fn controller() -> ChatController {
        let store = MemoryStore::new().with("WEB_USER_ID", "web-fixed001");
        let mut c = ChatController::bootstrap(&ChatClientConfig::default(), &store).unwrap();
        c.take_updates();
        c
    }

    fn texts(c: &ChatController) -> Vec<(Role, &str)> {
        c.transcript().turns().iter().map(|t| (t.role, t.text.as_str())).collect()
    }

    /// submit + send + settle, the way both delivery contexts drive it.
    fn exchange(c: &mut ChatController, transport: &ScriptedTransport, text: &str) -> bool {
        let Some(request) = c.submit(text) else { return false };
        let outcome = pollster::block_on(transport.send(c.endpoint(), &request));
        c.settle(outcome)
    }

    #[test]
    fn bootstrap_resolves_endpoint_and_identity() {
        let store = MemoryStore::new().with("CORE_API_BASE", "http://saved:1");
        let cfg = ChatClientConfig::default();

        let mut c = ChatController::bootstrap(&cfg, &store).unwrap();
        assert_eq!(c.endpoint().as_str(), "http://saved:1");
        assert!(c.identity().as_str().starts_with("web-"));
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(
            c.take_updates(),
            vec![ViewUpdate::Endpoint(Endpoint::new("http://saved:1")), ViewUpdate::SendEnabled(true)]
        );

        // same store, same identity
        let again = ChatController::bootstrap(&cfg, &store).unwrap();
        assert_eq!(again.identity(), c.identity());

        let overridden = ChatController::bootstrap(&cfg.clone().with_override("http://qs:2"), &store).unwrap();
        assert_eq!(overridden.endpoint().as_str(), "http://qs:2");
    }

    #[test]
    fn submit_appends_trimmed_user_turn_and_disables_send() {
        let mut c = controller();
        let req = c.submit("  hello  ").expect("request");

        assert_eq!(req.text, "hello");
        assert_eq!(req.channel, "web");
        assert_eq!(req.user_id, "web-fixed001");
        assert_eq!(texts(&c), vec![(Role::User, "hello")]);
        assert_eq!(c.state(), SessionState::Awaiting);
        assert!(!c.send_enabled());
        assert_eq!(
            c.take_updates(),
            vec![
                ViewUpdate::Turn(Turn { index: 0, role: Role::User, text: "hello".into() }),
                ViewUpdate::ClearPrompt,
                ViewUpdate::SendEnabled(false),
            ]
        );
    }

    #[test]
    fn blank_submit_is_a_noop() {
        let mut c = controller();
        for raw in ["", "   ", "\n\t "] {
            assert_eq!(c.submit(raw), None);
        }
        assert!(c.transcript().is_empty());
        assert_eq!(c.state(), SessionState::Idle);
        assert!(!c.has_pending());
    }

    #[test]
    fn second_submit_while_awaiting_is_suppressed() {
        let mut c = controller();
        assert!(c.submit("first").is_some());
        assert_eq!(c.submit("second"), None);
        assert_eq!(texts(&c), vec![(Role::User, "first")]);
    }

    #[test]
    fn parts_become_assistant_turns_in_order() {
        let mut c = controller();
        let t = ScriptedTransport::replying([Ok(ChatResponse::with_parts([" a ", "b"]))]);

        assert!(exchange(&mut c, &t, "q"));
        assert_eq!(
            texts(&c),
            vec![(Role::User, "q"), (Role::Assistant, " a "), (Role::Assistant, "b")]
        );
        assert_eq!(c.state(), SessionState::Idle);

        let (endpoint, req) = t.requests().remove(0);
        assert_eq!(endpoint, *c.endpoint());
        assert_eq!(req.text, "q");
    }

    #[test]
    fn empty_or_missing_parts_yield_one_notice() {
        let replies = [
            Ok(ChatResponse::with_parts(Vec::<String>::new())),
            Ok(ChatResponse::default()),
        ];
        for reply in replies {
            let mut c = controller();
            let t = ScriptedTransport::replying([reply]);
            exchange(&mut c, &t, "q");
            assert_eq!(
                texts(&c),
                vec![(Role::User, "q"), (Role::Assistant, "Empty response from Core API")]
            );
        }
    }

    #[test]
    fn failure_yields_one_error_turn_and_returns_to_idle() {
        let mut c = controller();
        let t = ScriptedTransport::replying([Err(TransportError::Status { status: 500, body: "boom".into() })]);

        exchange(&mut c, &t, "q");
        assert_eq!(c.transcript().len(), 2);
        let last = c.transcript().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text, "Error: 500 boom");
        assert_eq!(c.state(), SessionState::Idle);
        assert!(c.send_enabled());
    }

    #[test]
    fn every_settle_reenables_and_focuses() {
        let outcomes = [
            Ok(ChatResponse::with_parts(["x"])),
            Ok(ChatResponse::default()),
            Err(TransportError::Network("connection refused".into())),
            Err(TransportError::Decode("expected value at line 1".into())),
        ];
        for outcome in outcomes {
            let mut c = controller();
            c.submit("q").unwrap();
            c.take_updates();
            c.settle(outcome);

            let updates = c.take_updates();
            assert_eq!(
                &updates[updates.len() - 2..],
                &[ViewUpdate::SendEnabled(true), ViewUpdate::FocusPrompt]
            );
            assert!(c.send_enabled());
        }
    }

    #[test]
    fn outcome_while_idle_is_ignored() {
        let mut c = controller();
        assert!(!c.settle(Ok(ChatResponse::with_parts(["stray"]))));
        assert!(!c.settle(Err(TransportError::Network("late".into()))));
        assert!(c.transcript().is_empty());
        assert!(!c.has_pending());

        // a finished exchange followed by a duplicate outcome adds nothing either
        let t = ScriptedTransport::replying([Ok(ChatResponse::with_parts(["a"]))]);
        assert!(exchange(&mut c, &t, "q"));
        c.take_updates();
        assert!(!c.settle(Ok(ChatResponse::with_parts(["again"]))));
        assert_eq!(texts(&c), vec![(Role::User, "q"), (Role::Assistant, "a")]);
        assert!(!c.has_pending());
        assert_eq!(c.state(), SessionState::Idle);
    }

    #[test]
    fn session_stays_usable_after_failure() {
        let mut c = controller();
        let t = ScriptedTransport::replying([
            Err(TransportError::Network("dns error".into())),
            Ok(ChatResponse::with_parts(["back"])),
        ]);

        assert!(exchange(&mut c, &t, "one"));
        assert!(exchange(&mut c, &t, "two"));
        assert_eq!(
            texts(&c),
            vec![
                (Role::User, "one"),
                (Role::Assistant, "Error: dns error"),
                (Role::User, "two"),
                (Role::Assistant, "back"),
            ]
        );
    }

    #[test]
    fn save_endpoint_updates_display_and_acknowledges() {
        let store = MemoryStore::new();
        let mut c = ChatController::bootstrap(&ChatClientConfig::default(), &store).unwrap();
        c.take_updates();

        assert!(c.save_endpoint(&store, " http://core:9000 "));
        assert_eq!(c.endpoint().as_str(), "http://core:9000");
        assert_eq!(store.get("CORE_API_BASE").as_deref(), Some("http://core:9000"));
        assert_eq!(
            c.take_updates(),
            vec![
                ViewUpdate::Endpoint(Endpoint::new("http://core:9000")),
                ViewUpdate::Turn(Turn {
                    index: 0,
                    role: Role::System,
                    text: "API changed: http://core:9000".into()
                }),
            ]
        );

        assert!(!c.save_endpoint(&store, "   "));
        assert!(!c.has_pending());
        assert_eq!(c.transcript().len(), 1);
    }

    struct FailingStore;

    impl KvStore for FailingStore {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("private mode".into()))
        }
    }

    #[test]
    fn endpoint_applies_even_if_not_persisted() {
        let mut c = controller();
        assert!(c.save_endpoint(&FailingStore, "http://elsewhere"));
        assert_eq!(c.endpoint().as_str(), "http://elsewhere");
        assert_eq!(c.transcript().last().unwrap().role, Role::System);
    }

    #[test]
    fn flush_preserves_order_across_calls() {
        let mut c = controller();
        let t = ScriptedTransport::replying([Ok(ChatResponse::with_parts(["a", "b"]))]);
        exchange(&mut c, &t, "q");

        let mut view: Vec<ViewUpdate> = Vec::new();
        c.flush(&mut view);
        c.flush(&mut view);
        let turns: Vec<usize> = view
            .iter()
            .filter_map(|u| match u {
                ViewUpdate::Turn(t) => Some(t.index),
                _ => None,
            })
            .collect();
        assert_eq!(turns, vec![0, 1, 2]);
    }
}
