//! minimal bevy + bevy_web_chat example against a core api backend.
//! - endpoint text box + save button (saved endpoint survives restarts).
//! - transcript shows the most recent turns, prompt line underneath.
//! - health probe (`/healthz`) whenever the endpoint changes.
//!
//! keys: tab switches between endpoint and prompt, enter saves / sends.
//!
//! env (native):
//!   CORE_API_BASE          endpoint override (wins over the saved one)
//!   CORE_API_ORIGIN        default endpoint (http://localhost:8000)
//!   CORE_API_TIMEOUT_SECS  request timeout, 0 = none
//!   WEB_CHAT_STATE         state file (default web_chat_state.json)

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy::tasks::{IoTaskPool, Task};
use bevy_web_chat::{
    ChatClientConfig, ChatSession, ChatSet, ChatStore, ChatTransport, ChatViewEvt, Endpoint,
    HealthStatus, ViewUpdate, WebChatPlugin, save_endpoint, submit_prompt,
};

const VISIBLE_TURNS: usize = 14;

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct TranscriptText;
#[derive(Component)]
struct PromptText;
#[derive(Component)]
struct EndpointText;
#[derive(Component)]
struct HealthText;

#[derive(Component)]
struct BtnSave;

#[derive(Component, Copy, Clone)]
struct TargetSession(Entity);

// ---------------------- app state ----------------------

#[derive(Resource, Default)]
struct PromptBuf(String);

/// editable endpoint field; reset to the live endpoint on every change.
#[derive(Resource, Default)]
struct EndpointBuf(String);

#[derive(Resource, Default)]
struct SendEnabled(bool);

#[derive(Resource, Default)]
struct TranscriptLines(Vec<String>);

#[derive(Resource, Default)]
struct HealthLabel(String);

#[derive(Resource, Default)]
struct PendingHealthTask(Option<Task<Result<HealthStatus, String>>>);

#[derive(Resource)]
struct Focus(FocusField);
impl Default for Focus {
    fn default() -> Self {
        Self(FocusField::Prompt)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FocusField {
    Endpoint,
    Prompt,
}

// ---------------------- main ----------------------

#[cfg(not(target_arch = "wasm32"))]
fn client_setup() -> (ChatClientConfig, ChatStore) {
    use bevy_web_chat::FileStore;
    use std::sync::Arc;

    let config = ChatClientConfig::from_env();
    let path = std::env::var("WEB_CHAT_STATE").unwrap_or_else(|_| "web_chat_state.json".to_string());
    let store = match FileStore::open(&path) {
        Ok(store) => ChatStore(Arc::new(store)),
        Err(err) => {
            // logging isn't up yet
            eprintln!("state file unusable ({err}); endpoint and client id won't persist");
            ChatStore::default()
        }
    };
    (config, store)
}

#[cfg(target_arch = "wasm32")]
fn client_setup() -> (ChatClientConfig, ChatStore) {
    let mut config = ChatClientConfig::default();
    if let Some(window) = web_sys::window() {
        if let Ok(origin) = bevy_web_chat::web::page_origin(&window) {
            config.default_origin = origin;
        }
        config.endpoint_override = bevy_web_chat::web::query_override(&window);
    }
    (config, ChatStore::default())
}

fn main() {
    let (config, store) = client_setup();

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(config)
        .insert_resource(store)
        .init_resource::<PromptBuf>()
        .init_resource::<EndpointBuf>()
        .init_resource::<SendEnabled>()
        .init_resource::<TranscriptLines>()
        .init_resource::<HealthLabel>()
        .init_resource::<PendingHealthTask>()
        .init_resource::<Focus>()
        .add_plugins(DefaultPlugins)
        .add_plugins(WebChatPlugin)
        .add_systems(Startup, setup)
        .add_systems(
            Update,
            (handle_text_input, btn_save, poll_health_task, refresh_texts),
        )
        // event readers should run after bevy_web_chat emits events
        .add_systems(Update, on_view.after(ChatSet::Io))
        .run();
}

// ---------------------- setup ui ----------------------

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d);

    let session = commands.spawn(ChatSession).id();

    let style_18 = TextFont {
        font_size: 18.0,
        ..default()
    };
    let style_14 = TextFont {
        font_size: 14.0,
        ..default()
    };

    // root
    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(8.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(Color::NONE),
        ))
        .with_children(|p| {
            // --- endpoint box ---
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    height: Val::Auto,
                    column_gap: Val::Px(8.0),
                    flex_direction: FlexDirection::Row,
                    align_items: AlignItems::Center,
                    padding: UiRect::all(Val::Px(8.0)),
                    ..default()
                },
                BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
            ))
            .with_children(|row| {
                row.spawn((
                    Text::new(""),
                    style_14.clone(),
                    TextColor(Color::WHITE),
                    EndpointText,
                ));
                row.spawn((
                    Button,
                    Node {
                        width: Val::Px(70.0),
                        height: Val::Px(28.0),
                        align_items: AlignItems::Center,
                        justify_content: JustifyContent::Center,
                        ..default()
                    },
                    BackgroundColor(Color::srgb(0.2, 0.2, 0.25)),
                    BtnSave,
                    TargetSession(session),
                ))
                .with_children(|b| {
                    b.spawn((Text::new("save"), style_14.clone(), TextColor(Color::WHITE)));
                });
                row.spawn((
                    Text::new(""),
                    style_14.clone(),
                    TextColor(Color::srgb_u8(160, 160, 160)),
                    HealthText,
                ));
            });

            // --- conversation box ---
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    height: Val::Percent(100.0),
                    flex_direction: FlexDirection::Column,
                    justify_content: JustifyContent::FlexEnd,
                    row_gap: Val::Px(8.0),
                    padding: UiRect::axes(Val::Px(8.0), Val::Px(12.0)),
                    ..default()
                },
                BackgroundColor(Color::NONE),
            ))
            .with_children(|c| {
                c.spawn((
                    Text::new(""),
                    style_18.clone(),
                    TextColor(Color::WHITE),
                    TranscriptText,
                ));
                c.spawn((
                    Text::new("> "),
                    style_14.clone(),
                    TextColor(Color::WHITE),
                    PromptText,
                    TargetSession(session),
                ));
            });
        });
}

// ---------------------- input & buttons ----------------------

fn handle_text_input(
    mut commands: Commands,
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut focus: ResMut<Focus>,
    mut endpoint: ResMut<EndpointBuf>,
    mut prompt: ResMut<PromptBuf>,
    send: Res<SendEnabled>,
    q_target: Query<&TargetSession, With<PromptText>>,
) {
    if keys.just_pressed(KeyCode::Tab) {
        focus.0 = match focus.0 {
            FocusField::Endpoint => FocusField::Prompt,
            FocusField::Prompt => FocusField::Endpoint,
        };
    }

    for ev in ev_kbd.read() {
        if ev.state.is_pressed()
            && let Some(txt) = &ev.text {
                let s = txt.replace(['\r', '\n', '\t'], "");
                match focus.0 {
                    FocusField::Endpoint => endpoint.0.push_str(&s),
                    FocusField::Prompt => prompt.0.push_str(&s),
                }
        }
    }

    if keys.just_pressed(KeyCode::Backspace) {
        match focus.0 {
            FocusField::Endpoint => {
                endpoint.0.pop();
            }
            FocusField::Prompt => {
                prompt.0.pop();
            }
        }
    }

    if keys.just_pressed(KeyCode::Enter) {
        let Ok(TargetSession(e)) = q_target.single() else { return };
        match focus.0 {
            // the prompt is cleared by the session (ViewUpdate::ClearPrompt), not here
            FocusField::Prompt if send.0 => submit_prompt(&mut commands, *e, prompt.0.clone()),
            FocusField::Prompt => {}
            FocusField::Endpoint => save_endpoint(&mut commands, *e, endpoint.0.clone()),
        }
    }
}

fn btn_save(
    mut commands: Commands,
    mut q: Query<(&Interaction, &TargetSession, &mut BackgroundColor), (Changed<Interaction>, With<BtnSave>)>,
    endpoint: Res<EndpointBuf>,
) {
    for (i, TargetSession(e), mut bg) in &mut q {
        match *i {
            Interaction::Pressed => {
                bg.0 = Color::srgb(0.3, 0.3, 0.35);
                save_endpoint(&mut commands, *e, endpoint.0.clone());
            }
            Interaction::Hovered => bg.0 = Color::srgb(0.25, 0.25, 0.3),
            Interaction::None => bg.0 = Color::srgb(0.2, 0.2, 0.25),
        }
    }
}

// ---------------------- chat events ----------------------

#[allow(clippy::too_many_arguments)]
fn on_view(
    mut ev: EventReader<ChatViewEvt>,
    mut lines: ResMut<TranscriptLines>,
    mut endpoint: ResMut<EndpointBuf>,
    mut prompt: ResMut<PromptBuf>,
    mut send: ResMut<SendEnabled>,
    mut focus: ResMut<Focus>,
    mut health: ResMut<HealthLabel>,
    mut pending: ResMut<PendingHealthTask>,
    transport: Res<ChatTransport>,
    #[cfg(not(target_arch = "wasm32"))] rt: Option<Res<bevy_web_chat::TokioRt>>,
) {
    for ChatViewEvt { update, .. } in ev.read() {
        match update {
            ViewUpdate::Turn(turn) => lines.0.push(format!("{}: {}", turn.role, turn.text)),
            ViewUpdate::Endpoint(ep) => {
                endpoint.0 = ep.to_string();
                health.0 = "(checking...)".to_string();
                #[cfg(not(target_arch = "wasm32"))]
                let task = rt.as_ref().map(|rt| spawn_health_probe(&transport, rt.0.clone(), ep.clone()));
                #[cfg(target_arch = "wasm32")]
                let task = Some(spawn_health_probe(&transport, ep.clone()));
                pending.0 = task;
            }
            ViewUpdate::ClearPrompt => prompt.0.clear(),
            ViewUpdate::SendEnabled(enabled) => send.0 = *enabled,
            ViewUpdate::FocusPrompt => focus.0 = FocusField::Prompt,
        }
    }
}

// ---------------------- health probe ----------------------

#[cfg(not(target_arch = "wasm32"))]
fn spawn_health_probe(
    transport: &ChatTransport,
    rt: std::sync::Arc<tokio::runtime::Runtime>,
    endpoint: Endpoint,
) -> Task<Result<HealthStatus, String>> {
    info!(target: "chat_example", "health probe -> {}", endpoint);
    let transport = transport.0.clone();
    IoTaskPool::get().spawn(async move {
        match rt.spawn(async move { transport.health(&endpoint).await }).await {
            Ok(res) => res.map_err(|e| e.to_string()),
            Err(join) => Err(join.to_string()),
        }
    })
}

#[cfg(target_arch = "wasm32")]
fn spawn_health_probe(transport: &ChatTransport, endpoint: Endpoint) -> Task<Result<HealthStatus, String>> {
    info!(target: "chat_example", "health probe -> {}", endpoint);
    let transport = transport.0.clone();
    IoTaskPool::get().spawn(async move { transport.health(&endpoint).await.map_err(|e| e.to_string()) })
}

fn poll_health_task(mut task_res: ResMut<PendingHealthTask>, mut health: ResMut<HealthLabel>) {
    use bevy::tasks::futures_lite::future;

    if let Some(task) = task_res.0.as_mut()
        && let Some(result) = future::block_on(future::poll_once(task)) {
            health.0 = match result {
                Ok(h) if h.is_ok() => "backend ok".to_string(),
                Ok(h) => format!("backend status: {}", h.status),
                Err(e) => {
                    warn!(target: "chat_example", "health probe failed: {}", e);
                    format!("backend unreachable: {e}")
                }
            };
            task_res.0 = None;
    }
}

// ---------------------- text refresh ----------------------

fn refresh_texts(
    lines: Res<TranscriptLines>,
    endpoint: Res<EndpointBuf>,
    prompt: Res<PromptBuf>,
    send: Res<SendEnabled>,
    focus: Res<Focus>,
    health: Res<HealthLabel>,
    mut sets: ParamSet<(
        Query<&mut Text, With<TranscriptText>>,
        Query<&mut Text, With<EndpointText>>,
        Query<&mut Text, With<PromptText>>,
        Query<&mut Text, With<HealthText>>,
    )>,
) {
    let caret = |field: FocusField| if focus.0 == field { " |" } else { "" };

    if lines.is_changed()
        && let Ok(mut t) = sets.p0().single_mut() {
            // newest turn always visible
            let start = lines.0.len().saturating_sub(VISIBLE_TURNS);
            t.0 = lines.0[start..].join("\n");
    }
    if (endpoint.is_changed() || focus.is_changed())
        && let Ok(mut t) = sets.p1().single_mut() {
            t.0 = format!("endpoint: {}{}", endpoint.0, caret(FocusField::Endpoint));
    }
    if (prompt.is_changed() || send.is_changed() || focus.is_changed())
        && let Ok(mut t) = sets.p2().single_mut() {
            let waiting = if send.0 { "" } else { "  (waiting...)" };
            t.0 = format!("> {}{}{}", prompt.0, caret(FocusField::Prompt), waiting);
    }
    if health.is_changed()
        && let Ok(mut t) = sets.p3().single_mut() {
            t.0 = health.0.clone();
    }
}
