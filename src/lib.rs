//! bevy_deepchat: a chat panel for local reasoning models.
//!
//! - one host command ([`StartChat`] or a hotkey) opens a new chat panel.
//! - each panel owns its [`Conversation`] and sends the whole history with
//!   every request; the host side keeps no session state.
//! - replies are streamed from a local ollama server through the `llm` crate,
//!   buffered, and handed back to the panel in one piece.
//! - `<think>` reasoning is split out and shown behind a collapsed toggle; the
//!   rest is rendered as markdown with highlighted code blocks.
//! - never blocks the main thread: on native requests run on a tiny tokio
//!   runtime; on wasm they are awaited on bevy's async pool.

use std::sync::Arc;

use bevy::prelude::*;

pub mod bridge;
pub mod client;
pub mod conversation;
mod host;
pub mod panel;
pub mod probe;
pub mod render;
pub mod reply;

pub use bridge::{BridgeError, ChatReply, PanelMessage, RequestId, ToHost, ToPanel};
pub use client::{
    FragmentStream, Inference, InferenceClient, LlmClient, ServiceError, collect_reply, relay,
};
pub use conversation::{Conversation, Role, Turn};
#[cfg(not(target_arch = "wasm32"))]
pub use host::TokioRt;
pub use panel::{ChatPanel, FocusedPanel, PromptInput, ReasoningToggle, SubmitPrompt, spawn_chat_panel};
pub use probe::ModelStatus;
pub use render::{RichText, render_markdown};
pub use reply::FinalReply;

/// plugin configuration. insert before `DeepChatPlugin` to override the defaults.
#[derive(Resource, Clone, Debug)]
pub struct ChatConfig {
    /// ollama server root, without `/api`.
    pub base_url: String,
    /// the one model every request goes to.
    pub model: String,
    pub title: String,
    /// hotkey for the open-panel command; `None` leaves it to [`StartChat`] events.
    pub open_panel_key: Option<KeyCode>,
    pub font_size: f32,
    pub line_height: f32,
    pub input_min_height: f32,
    pub input_max_height: f32,
    /// ask the server once whether `model` is installed.
    pub probe_model: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "deepseek-r1:14b".to_string(),
            title: "Deep Seek Chat".to_string(),
            open_panel_key: Some(KeyCode::F2),
            font_size: 16.0,
            line_height: 24.0,
            input_min_height: 40.0,
            input_max_height: 150.0,
            probe_model: true,
        }
    }
}

/// fonts used by the panels. bevy's default font unless replaced.
#[derive(Resource, Clone, Default)]
pub struct ChatFonts {
    pub regular: Handle<Font>,
    pub bold: Handle<Font>,
    pub italic: Handle<Font>,
    pub mono: Handle<Font>,
}

/// the host command: every event opens one new chat panel.
#[derive(Event, Clone, Copy, Debug, Default)]
pub struct StartChat;

/// system ordering so uis can run after replies are emitted
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// finished replies become `ToPanel` events here (in `Update`)
    Drain,
}

/// installs the default ollama client unless the app brought its own.
fn install_default_client(
    mut commands: Commands,
    config: Res<ChatConfig>,
    existing: Option<Res<Inference>>,
) {
    if existing.is_some() {
        return;
    }
    match LlmClient::from_config(&config) {
        Ok(client) => commands.insert_resource(Inference(Arc::new(client))),
        Err(err) => error!(target: "bevy_deepchat", "{}", err),
    }
}

/// bevy plugin: wires systems, events, resources.
/// on native, also inserts a tiny tokio runtime resource by default.
pub struct DeepChatPlugin;

impl Plugin for DeepChatPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_deepchat", "DeepChatPlugin: build()");
        app.init_resource::<ChatConfig>()
            .init_resource::<ChatFonts>()
            .init_resource::<FocusedPanel>()
            .init_resource::<ModelStatus>()
            .init_resource::<probe::PendingProbe>()
            .init_resource::<host::ReplyInbox>()
            .add_event::<StartChat>()
            .add_event::<SubmitPrompt>()
            .add_event::<ToHost>()
            .add_event::<ToPanel>()
            .configure_sets(Update, ChatSet::Drain)
            .add_systems(Startup, install_default_client)
            .add_systems(
                Update,
                (
                    panel::open_panel_on_hotkey,
                    (panel::spawn_panels, probe::start_model_probe),
                )
                    .chain(),
            )
            .add_systems(
                Update,
                (
                    panel::focus_on_click,
                    panel::type_into_prompt,
                    panel::click_send,
                    panel::send_prompts,
                    host::relay_chat_requests,
                )
                    .chain()
                    .before(ChatSet::Drain),
            )
            .add_systems(Update, host::drain_reply_inbox.in_set(ChatSet::Drain))
            .add_systems(
                Update,
                (
                    panel::receive_replies,
                    panel::toggle_reasoning,
                    panel::close_panels,
                    panel::button_colors,
                    panel::refresh_prompt,
                    panel::scroll_message_lists,
                    probe::poll_model_probe,
                    panel::refresh_status_lines,
                )
                    .chain()
                    .after(ChatSet::Drain),
            );

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}
