//! bevy_web_chat: a small chat client for "core api" style backends.
//!
//! - `POST {endpoint}/v1/chat` with `{"channel":"web","user_id","text"}`, replies are
//!   `{"parts":[...]}`, one transcript turn per part.
//! - endpoint: explicit override > saved value > origin default, user edits persisted.
//! - client id: `web-xxxxxxxx`, generated once per store and reused.
//! - one request in flight per session; failures become transcript turns, never panics.
//!
//! the session logic (`ChatController`) is ui-agnostic. two shims drive it:
//!   - `WebChatPlugin`: bevy ecs. sessions are entities; exchanges run off the main
//!     thread (tokio on native, the browser event loop on wasm) and come back through
//!     an inbox drained in `Update`.
//!   - `web::mount` (wasm only): binds an existing html page, no bevy app needed.

use bevy::prelude::*;
use bevy::tasks::AsyncComputeTaskPool;
use flume::{Receiver, Sender, TryRecvError};
use std::sync::Arc;

pub mod config;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod session;
pub mod store;
pub mod transcript;
pub mod transport;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use config::ChatClientConfig;
pub use endpoint::{Endpoint, EndpointResolver, resolve_endpoint};
pub use error::ChatError;
pub use identity::{ClientIdentity, IdentityProvider};
pub use session::{ChatController, ChatView, SessionState, ViewUpdate};
pub use store::{KvStore, MemoryStore, StoreError};
#[cfg(not(target_arch = "wasm32"))]
pub use store::FileStore;
#[cfg(target_arch = "wasm32")]
pub use store::LocalStorage;
pub use transcript::{Role, Transcript, Turn};
pub use transport::{
    ChatRequest, ChatResponse, HealthStatus, HttpTransport, Transport, TransportError,
};

/// persistence used by every session: memory on native (insert a `FileStore` to
/// keep values across runs), `localStorage` on wasm.
#[derive(Resource, Clone)]
pub struct ChatStore(pub Arc<dyn KvStore>);

impl Default for ChatStore {
    fn default() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            Self(Arc::new(LocalStorage))
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            Self(Arc::new(MemoryStore::new()))
        }
    }
}

/// the backend transport. defaults to `HttpTransport` built from `ChatClientConfig`.
#[derive(Resource, Clone)]
pub struct ChatTransport(pub Arc<dyn Transport>);

/// on native we keep a tiny tokio runtime to drive exchanges.
/// we spawn onto this rt from compute tasks so neither the main thread
/// nor bevy's compute pools block on http.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl TokioRt {
    pub fn new() -> std::io::Result<Self> {
        info!(target: "bevy_web_chat", "WebChatPlugin: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        Ok(Self(Arc::new(rt)))
    }
}

/// system ordering so uis can run after we emit events
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// bevy_web_chat consumes inputs and emits Chat* events here (in `Update`)
    Io,
}

/// attach this to an entity to make it a chat session; a `ChatController`
/// is inserted next frame.
#[derive(Component, Clone, Debug, Default)]
pub struct ChatSession;

/// composer texts submitted on a session entity, oldest first. drained every frame.
#[derive(Component, Clone, Debug, Default)]
pub struct PromptSubmission {
    pub texts: Vec<String>,
}

/// endpoint edits saved on a session entity, oldest first. drained every frame.
#[derive(Component, Clone, Debug, Default)]
pub struct EndpointEdit {
    pub addresses: Vec<String>,
}

/// helper to submit composer text on a session entity. several submissions in
/// one frame queue up; the first accepted one starts the exchange.
pub fn submit_prompt(commands: &mut Commands, target: Entity, text: impl Into<String>) {
    let text = text.into();
    debug!(target: "bevy_web_chat", "submit_prompt -> entity={:?} len={}", target, text.len());
    let queued = text.clone();
    commands
        .entity(target)
        .entry::<PromptSubmission>()
        .and_modify(move |mut pending| pending.texts.push(queued))
        .or_insert(PromptSubmission { texts: vec![text] });
}

/// helper to save an endpoint edit on a session entity. edits apply in order.
pub fn save_endpoint(commands: &mut Commands, target: Entity, address: impl Into<String>) {
    let address = address.into();
    let queued = address.clone();
    commands
        .entity(target)
        .entry::<EndpointEdit>()
        .and_modify(move |mut pending| pending.addresses.push(queued))
        .or_insert(EndpointEdit { addresses: vec![address] });
}

/// ui updates of one session, in the order the controller produced them.
#[derive(Event, Debug, Clone)]
pub struct ChatViewEvt {
    pub entity: Entity,
    pub update: ViewUpdate,
}

#[derive(Event, Debug)]
pub struct ChatStarted {
    pub entity: Entity,
    pub endpoint: Endpoint,
}

/// an exchange finished. `error` carries the transport failure, if any;
/// the transcript already shows it.
#[derive(Event, Debug)]
pub struct ChatSettledEvt {
    pub entity: Entity,
    pub error: Option<String>,
}

/// cross-thread inbox for exchange outcomes; tasks send, main thread drains.
/// bounded: at most one exchange per session is ever in flight.
#[derive(Resource, Clone)]
struct ExchangeInbox {
    tx: Sender<Settled>,
    rx: Receiver<Settled>,
}

impl Default for ExchangeInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(256);
        Self { tx, rx }
    }
}

#[derive(Debug)]
struct Settled {
    entity: Entity,
    outcome: Result<ChatResponse, TransportError>,
}

/// send to inbox. a full inbox parks the task until the main thread drains, it never
/// blocks the thread (wasm has only one). a closed inbox means the app is going away.
async fn push_inbox(tx: &Sender<Settled>, msg: Settled) {
    if let Err(err) = tx.send_async(msg).await {
        warn!(target: "bevy_web_chat", "dropping outcome for {:?}: inbox closed", err.into_inner().entity);
    }
}

fn publish(entity: Entity, controller: &mut ChatController, ev_view: &mut EventWriter<ChatViewEvt>) {
    for update in controller.take_updates() {
        ev_view.write(ChatViewEvt { entity, update });
    }
}

/// bevy plugin: wires systems, events, resources.
/// inserts default `ChatClientConfig`, `ChatStore` and `ChatTransport` unless the
/// app already has them; on native, also a tiny tokio runtime.
pub struct WebChatPlugin;

impl Plugin for WebChatPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_web_chat", "WebChatPlugin: build()");
        app.init_resource::<ChatClientConfig>()
            .init_resource::<ChatStore>()
            .init_resource::<ExchangeInbox>()
            .add_event::<ChatViewEvt>()
            .add_event::<ChatStarted>()
            .add_event::<ChatSettledEvt>()
            .configure_sets(Update, ChatSet::Io)
            .add_systems(
                Update,
                (
                    attach_controllers,
                    apply_endpoint_edits,
                    dispatch_submissions,
                    drain_exchange_inbox,
                )
                    .chain()
                    .in_set(ChatSet::Io),
            );

        if app.world().get_resource::<ChatTransport>().is_none() {
            let transport = HttpTransport::new(app.world().resource::<ChatClientConfig>());
            app.insert_resource(ChatTransport(Arc::new(transport)));
        }

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            match TokioRt::new() {
                Ok(rt) => {
                    app.insert_resource(rt);
                }
                Err(err) => error!(target: "bevy_web_chat", "tokio runtime unavailable, chat disabled: {}", err),
            }
        }
    }
}

/// builds a controller for every new `ChatSession`.
fn attach_controllers(
    mut commands: Commands,
    config: Res<ChatClientConfig>,
    store: Res<ChatStore>,
    q: Query<Entity, (With<ChatSession>, Without<ChatController>)>,
    mut ev_view: EventWriter<ChatViewEvt>,
) {
    for e in q.iter() {
        match ChatController::bootstrap(&config, store.0.as_ref()) {
            Ok(mut controller) => {
                info!(target: "bevy_web_chat", "attach_controllers: entity={:?} endpoint={}", e, controller.endpoint());
                publish(e, &mut controller, &mut ev_view);
                commands.entity(e).insert(controller);
            }
            Err(err) => {
                error!(target: "bevy_web_chat", "chat session {:?} failed to start: {}", e, err);
                commands.entity(e).remove::<ChatSession>();
            }
        }
    }
}

fn apply_endpoint_edits(
    store: Res<ChatStore>,
    mut q: Query<(Entity, &mut ChatController, &mut EndpointEdit), Changed<EndpointEdit>>,
    mut ev_view: EventWriter<ChatViewEvt>,
) {
    for (e, mut controller, mut edit) in q.iter_mut() {
        if edit.addresses.is_empty() {
            continue;
        }
        for address in std::mem::take(&mut edit.addresses) {
            if controller.save_endpoint(store.0.as_ref(), &address) {
                publish(e, &mut controller, &mut ev_view);
            }
        }
    }
}

/// turns submissions into exchanges (compute-tasks-first, like any bevy io).
fn dispatch_submissions(
    transport: Res<ChatTransport>,
    inbox: Res<ExchangeInbox>,
    mut q: Query<(Entity, &mut ChatController, &mut PromptSubmission), Changed<PromptSubmission>>,
    mut ev_view: EventWriter<ChatViewEvt>,
    mut ev_start: EventWriter<ChatStarted>,

    // native-only: small runtime to drive the blocking http client
    #[cfg(not(target_arch = "wasm32"))] rt: Option<Res<TokioRt>>,
) {
    for (e, mut controller, mut submission) in q.iter_mut() {
        if submission.texts.is_empty() {
            continue;
        }
        let texts = std::mem::take(&mut submission.texts);

        #[cfg(not(target_arch = "wasm32"))]
        let Some(rt) = rt.as_ref().map(|r| r.0.clone()) else {
            warn!(target: "bevy_web_chat", "no tokio runtime; dropping {} submission(s) for {:?}", texts.len(), e);
            continue;
        };

        // the first accepted text disables sending before anything is spawned,
        // so everything queued behind it is suppressed
        let mut queued = texts.iter();
        let request = queued.by_ref().find_map(|text| controller.submit(text));
        let suppressed = queued.count();
        if suppressed > 0 {
            debug!(target: "bevy_web_chat", "{} submission(s) for {:?} suppressed: a request is in flight", suppressed, e);
        }
        let Some(request) = request else {
            continue;
        };
        publish(e, &mut controller, &mut ev_view);

        let endpoint = controller.endpoint().clone();
        info!(target: "bevy_web_chat",
            "dispatch_submissions: entity={:?} endpoint={} len={}",
            e, endpoint, request.text.len()
        );
        ev_start.write(ChatStarted { entity: e, endpoint: endpoint.clone() });

        let transport = transport.0.clone();
        let tx = inbox.tx.clone();
        let pool = AsyncComputeTaskPool::get();

        pool.spawn(async move {
            let run = async move { transport.send(&endpoint, &request).await };

            #[cfg(target_arch = "wasm32")]
            let outcome = run.await;

            // native: hand off to tokio so bevy pools stay free. a panicked exchange
            // still settles the session.
            #[cfg(not(target_arch = "wasm32"))]
            let outcome = match rt.spawn(run).await {
                Ok(outcome) => outcome,
                Err(join) => Err(TransportError::Aborted(join.to_string())),
            };

            push_inbox(&tx, Settled { entity: e, outcome }).await;
        })
        .detach();
    }
}

/// drains the inbox and settles sessions.
fn drain_exchange_inbox(
    inbox: Res<ExchangeInbox>,
    mut q: Query<&mut ChatController>,
    mut ev_view: EventWriter<ChatViewEvt>,
    mut ev_settled: EventWriter<ChatSettledEvt>,
) {
    // drain up to a cap per frame
    const MAX_PER_FRAME: usize = 64;
    for _ in 0..MAX_PER_FRAME {
        let Settled { entity, outcome } = match inbox.rx.try_recv() {
            Ok(m) => m,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };
        let Ok(mut controller) = q.get_mut(entity) else {
            debug!(target: "bevy_web_chat", "outcome for despawned session {:?}", entity);
            continue;
        };

        let error = outcome.as_ref().err().map(ToString::to_string);
        if !controller.settle(outcome) {
            continue;
        }
        publish(entity, &mut controller, &mut ev_view);
        ev_settled.write(ChatSettledEvt { entity, error });
    }
}
