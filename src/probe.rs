//! one-shot check that the configured model is actually pulled on the ollama server.
//!
//! purely diagnostic: the client keeps using the configured model either way,
//! the panels just show a status line when something looks off.

use bevy::prelude::*;
use bevy::tasks::{IoTaskPool, Task};

use crate::{ChatConfig, StartChat};

#[derive(Resource, Clone, Debug, Default, PartialEq, Eq)]
pub enum ModelStatus {
    #[default]
    Unknown,
    Checking,
    Installed,
    Missing { installed: Vec<String> },
    Unreachable(String),
}

impl ModelStatus {
    /// status line for the panel, if there is anything worth saying.
    pub fn banner(&self, model: &str) -> Option<String> {
        match self {
            ModelStatus::Unknown | ModelStatus::Installed => None,
            ModelStatus::Checking => Some(format!("checking for model '{model}'...")),
            ModelStatus::Missing { installed } if installed.is_empty() => {
                Some(format!("model '{model}' is not installed (server has no models); try `ollama pull {model}`"))
            }
            ModelStatus::Missing { installed } => Some(format!(
                "model '{model}' is not installed; server has: {}",
                installed.join(", ")
            )),
            ModelStatus::Unreachable(err) => Some(format!("inference server unreachable: {err}")),
        }
    }
}

#[derive(Resource, Default)]
pub(crate) struct PendingProbe(Option<Task<Result<Vec<String>, String>>>);

pub fn tags_url(base_url: &str) -> String {
    format!("{}/api/tags", base_url.trim_end_matches('/'))
}

/// expects ollama's `{ "models": [ { "name": "...", ... }, ... ] }`.
pub fn parse_installed_models(text: &str) -> Result<Vec<String>, String> {
    let v: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let models = v
        .get("models")
        .and_then(|m| m.as_array())
        .ok_or_else(|| "response has no 'models' list".to_string())?;
    Ok(models
        .iter()
        .filter_map(|m| m.get("name").or_else(|| m.get("model")))
        .filter_map(|n| n.as_str())
        .map(str::to_string)
        .collect())
}

/// untagged names mean `:latest` to ollama.
pub fn is_installed(model: &str, installed: &[String]) -> bool {
    installed.iter().any(|name| {
        name == model || (!model.contains(':') && name.strip_suffix(":latest") == Some(model))
    })
}

fn spawn_fetch_tags(url: String) -> Task<Result<Vec<String>, String>> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        IoTaskPool::get().spawn(async move {
            // ureq is blocking; do it inside this worker
            let agent = ureq::Agent::new_with_defaults();
            let res = agent
                .get(&url)
                .header("accept", "application/json")
                .call()
                .map_err(|e| e.to_string())?;
            let text = res.into_body().read_to_string().map_err(|e| e.to_string())?;
            parse_installed_models(&text)
        })
    }

    #[cfg(target_arch = "wasm32")]
    {
        use gloo_net::http::Request;

        IoTaskPool::get().spawn(async move {
            let resp = Request::get(&url)
                .header("accept", "application/json")
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let text = resp.text().await.map_err(|e| e.to_string())?;
            parse_installed_models(&text)
        })
    }
}

/// kicks off the check the first time a panel is opened.
pub(crate) fn start_model_probe(
    mut opened: EventReader<StartChat>,
    config: Res<ChatConfig>,
    mut status: ResMut<ModelStatus>,
    mut pending: ResMut<PendingProbe>,
) {
    if opened.read().count() == 0 || *status != ModelStatus::Unknown || !config.probe_model {
        return;
    }
    let url = tags_url(&config.base_url);
    info!(target: "bevy_deepchat", "model probe -> {}", url);
    pending.0 = Some(spawn_fetch_tags(url));
    *status = ModelStatus::Checking;
}

pub(crate) fn poll_model_probe(
    config: Res<ChatConfig>,
    mut status: ResMut<ModelStatus>,
    mut pending: ResMut<PendingProbe>,
) {
    use bevy::tasks::futures_lite::future;

    let Some(task) = pending.0.as_mut() else {
        return;
    };
    let Some(result) = future::block_on(future::poll_once(task)) else {
        return;
    };
    pending.0 = None;
    *status = match result {
        Ok(installed) if is_installed(&config.model, &installed) => {
            info!(target: "bevy_deepchat", "model '{}' is installed", config.model);
            ModelStatus::Installed
        }
        Ok(installed) => {
            warn!(
                target: "bevy_deepchat",
                "model '{}' not found on server ({} installed)", config.model, installed.len()
            );
            ModelStatus::Missing { installed }
        }
        Err(err) => {
            warn!(target: "bevy_deepchat", "model probe failed: {}", err);
            ModelStatus::Unreachable(err)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_ollama_tags() {
        let body = r#"{"models":[
            {"name":"deepseek-r1:14b","model":"deepseek-r1:14b","size":9000000000},
            {"name":"llama3:latest","model":"llama3:latest"}
        ]}"#;
        assert_eq!(
            parse_installed_models(body).unwrap(),
            vec!["deepseek-r1:14b".to_string(), "llama3:latest".to_string()]
        );
        assert!(parse_installed_models(r#"{"data":[]}"#).is_err());
        assert!(parse_installed_models("not json").is_err());
    }

    #[test]
    fn latest_tag_is_implied() {
        let installed = vec!["llama3:latest".to_string(), "deepseek-r1:14b".to_string()];
        assert!(is_installed("llama3", &installed));
        assert!(is_installed("deepseek-r1:14b", &installed));
        assert!(!is_installed("deepseek-r1", &installed));
        assert!(!is_installed("deepseek-r1:7b", &installed));
    }

    #[test]
    fn tags_url_trims_slash() {
        assert_eq!(tags_url("http://127.0.0.1:11434/"), "http://127.0.0.1:11434/api/tags");
    }

    #[test]
    fn banner_only_when_something_is_off() {
        assert_eq!(ModelStatus::Installed.banner("m"), None);
        assert_eq!(ModelStatus::Unknown.banner("m"), None);
        let missing = ModelStatus::Missing { installed: vec!["a".into(), "b".into()] };
        assert_eq!(missing.banner("m").unwrap(), "model 'm' is not installed; server has: a, b");
        assert!(ModelStatus::Unreachable("refused".into()).banner("m").unwrap().contains("refused"));
    }
}
