//! bevy_deepchat demo: one window, one chat panel talking to a local ollama.
//! - press F2 to open another panel (each panel has its own conversation).
//! - enter sends, shift+enter inserts a newline.
//!
//! env:
//!   OLLAMA_HOST      (default http://127.0.0.1:11434, scheme optional)
//!   DEEPCHAT_MODEL   (default deepseek-r1:14b)

use bevy::prelude::*;
use bevy_deepchat::{ChatConfig, DeepChatPlugin, ModelStatus, StartChat};

// ollama accepts `host:port` in OLLAMA_HOST; the http client needs a scheme.
fn normalize_ollama_base(host: &str) -> String {
    let h = host.trim().trim_end_matches('/');
    if h.starts_with("http://") || h.starts_with("https://") {
        h.to_string()
    } else {
        format!("http://{}", h)
    }
}

fn main() {
    let defaults = ChatConfig::default();
    let base_url = std::env::var("OLLAMA_HOST")
        .map(|h| normalize_ollama_base(&h))
        .unwrap_or(defaults.base_url.clone());
    let model = std::env::var("DEEPCHAT_MODEL").unwrap_or(defaults.model.clone());

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(ChatConfig { base_url, model, ..defaults })
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "bevy_deepchat".into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(DeepChatPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, log_model_status)
        .run();
}

fn setup(mut commands: Commands, mut start: EventWriter<StartChat>, config: Res<ChatConfig>) {
    commands.spawn(Camera2d);
    info!(target: "chat", "opening first panel (model='{}', base='{}')", config.model, config.base_url);
    start.write(StartChat);
}

fn log_model_status(status: Res<ModelStatus>) {
    if status.is_changed() && !status.is_added() {
        info!(target: "chat", "model status -> {:?}", *status);
    }
}
