//! inference client adapter over the `llm` crate.
//!
//! api docs: https://docs.rs/llm
//!   - provider/builder:   `llm::LLMProvider`, `llm::builder::{LLMBuilder, LLMBackend}`
//!   - streaming:          `llm::chat::{StreamResponse, StreamChoice, StreamDelta}`
//!
//! on native the ollama `/api/chat` ndjson stream is read directly with ureq;
//! `llm` 1.3's ollama stream parser splits on blank lines, which ollama never sends.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bevy::prelude::*;
use futures_lite::{Stream, StreamExt};
use thiserror::Error;

use crate::bridge::ChatReply;
use crate::conversation::{Role, Turn};
use crate::ChatConfig;

pub use llm::{
    LLMProvider,
    builder::{LLMBackend, LLMBuilder},
    chat::{ChatMessage, ChatProvider, StreamResponse},
    error::LLMError,
};

/// the one error kind the adapter surfaces. every variant renders as a readable description.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Provider(#[from] LLMError),
    #[error("generation failed mid-stream: {0}")]
    Stream(String),
    #[error("inference request failed: {0}")]
    Http(String),
    #[error("could not build inference client for '{model}' at {base_url}: {reason}")]
    Build { base_url: String, model: String, reason: String },
    #[error("refusing to send an empty conversation")]
    EmptyConversation,
    #[error("no inference client is installed")]
    NoClient,
}

/// fragments of one reply, in production order. consumed once.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ServiceError>> + Send>>;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// starts generation for `turns` and hands back the fragment stream.
    async fn send(&self, turns: &[Turn]) -> Result<FragmentStream, ServiceError>;
}

/// the installed client. swap it before or after adding the plugin.
#[derive(Resource, Clone)]
pub struct Inference(pub Arc<dyn InferenceClient>);

/// talks to a local ollama server through `llm`, pinned to one model.
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    model: String,
    /// ollama `/api/chat`, streamed without going through `provider`. native only.
    chat_url: Option<String>,
}

impl LlmClient {
    /// any `llm` provider; replies stream through `chat_stream`, then `chat()`.
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into(), chat_url: None }
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self, ServiceError> {
        info!(
            target: "bevy_deepchat",
            "LlmClient: base_url='{}', model='{}'", config.base_url, config.model
        );
        let provider = LLMBuilder::new()
            .backend(LLMBackend::Ollama)
            .base_url(config.base_url.clone())
            .model(config.model.clone())
            .build()
            .map_err(|err| ServiceError::Build {
                base_url: config.base_url.clone(),
                model: config.model.clone(),
                reason: err.to_string(),
            })?;
        let mut client = Self::new(provider.into(), config.model.clone());
        if cfg!(not(target_arch = "wasm32")) {
            client.chat_url = Some(chat_url(&config.base_url));
        }
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn to_chat_message(turn: &Turn) -> ChatMessage {
    let builder = match turn.role {
        Role::User => ChatMessage::user(),
        Role::Assistant => ChatMessage::assistant(),
    };
    builder.content(turn.content.clone()).build()
}

fn delta_text(resp: StreamResponse) -> String {
    resp.choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect()
}

pub fn chat_url(base_url: &str) -> String {
    format!("{}/api/chat", base_url.trim_end_matches('/'))
}

/// ollama chat request; `Turn` already serializes as `{ role, content }`.
#[cfg(not(target_arch = "wasm32"))]
fn chat_request_body(model: &str, turns: &[Turn]) -> serde_json::Value {
    serde_json::json!({ "model": model, "messages": turns, "stream": true })
}

/// one line of the `/api/chat` ndjson stream.
#[cfg(not(target_arch = "wasm32"))]
#[derive(serde::Deserialize, Debug, Default)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[cfg(not(target_arch = "wasm32"))]
#[derive(serde::Deserialize, Debug)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[cfg(not(target_arch = "wasm32"))]
type FragmentSender = flume::Sender<Result<String, ServiceError>>;

/// posts the request on its own thread and forwards each content line as it arrives.
#[cfg(not(target_arch = "wasm32"))]
fn stream_ndjson(url: String, body: serde_json::Value) -> Result<FragmentStream, ServiceError> {
    let (tx, rx) = flume::bounded(64);
    std::thread::Builder::new()
        .name("deepchat-stream".into())
        .spawn(move || {
            if let Err(err) = pump_ndjson(&url, &body, &tx) {
                let _ = tx.send(Err(err));
            }
        })
        .map_err(|err| ServiceError::Http(err.to_string()))?;
    let fragments: FragmentStream = Box::pin(rx.into_stream());
    Ok(fragments)
}

#[cfg(not(target_arch = "wasm32"))]
fn pump_ndjson(url: &str, body: &serde_json::Value, tx: &FragmentSender) -> Result<(), ServiceError> {
    use std::io::{BufRead, BufReader};

    let agent = ureq::Agent::new_with_config(
        ureq::Agent::config_builder().http_status_as_error(false).build(),
    );
    let resp = agent
        .post(url)
        .header("accept", "application/x-ndjson")
        .send_json(body)
        .map_err(|err| ServiceError::Http(err.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.into_body().read_to_string().unwrap_or_default();
        // ollama reports failures as `{ "error": "..." }`
        let reason = serde_json::from_str::<ChatChunk>(&text)
            .ok()
            .and_then(|chunk| chunk.error)
            .unwrap_or(text);
        return Err(ServiceError::Http(format!("{status}: {reason}")));
    }

    let reader = BufReader::new(resp.into_body().into_reader());
    for line in reader.lines() {
        let line = line.map_err(|err| ServiceError::Stream(err.to_string()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk: ChatChunk = serde_json::from_str(line)
            .map_err(|err| ServiceError::Stream(format!("unreadable chunk: {err}")))?;
        if let Some(err) = chunk.error {
            return Err(ServiceError::Stream(err));
        }
        if let Some(message) = chunk.message
            && !message.content.is_empty()
            && tx.send(Ok(message.content)).is_err()
        {
            // nobody is listening anymore
            return Ok(());
        }
        if chunk.done {
            break;
        }
    }
    Ok(())
}

impl LlmClient {
    /// streams through the `llm` provider, falling back to one-shot `chat()`.
    async fn provider_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream, ServiceError> {
        match self.provider.chat_stream(messages).await {
            Ok(stream) => {
                let fragments: FragmentStream = Box::pin(
                    stream.map(|item| item.map_err(|err| ServiceError::Stream(err.to_string()))),
                );
                return Ok(fragments);
            }
            Err(err) => debug!(target: "bevy_deepchat", "chat_stream unavailable: {err}"),
        }

        match self.provider.chat_stream_struct(messages).await {
            Ok(stream) => {
                let fragments: FragmentStream = Box::pin(stream.map(|item| {
                    item.map(delta_text).map_err(|err| ServiceError::Stream(err.to_string()))
                }));
                Ok(fragments)
            }
            Err(err) => {
                // backend can't stream at all; take the whole reply as one fragment.
                warn!(
                    target: "bevy_deepchat",
                    "streaming unavailable for '{}': {err}. using one-shot chat()",
                    self.model
                );
                let resp = self.provider.chat(messages).await?;
                let text = resp.text().unwrap_or_default();
                let fragments: FragmentStream = Box::pin(futures_lite::stream::once(Ok(text)));
                Ok(fragments)
            }
        }
    }
}

#[async_trait]
impl InferenceClient for LlmClient {
    async fn send(&self, turns: &[Turn]) -> Result<FragmentStream, ServiceError> {
        if turns.is_empty() {
            return Err(ServiceError::EmptyConversation);
        }
        debug!(
            target: "bevy_deepchat",
            "send: model={} turns={} via={}",
            self.model, turns.len(), self.chat_url.as_deref().unwrap_or("llm provider")
        );

        #[cfg(not(target_arch = "wasm32"))]
        if let Some(url) = &self.chat_url {
            return stream_ndjson(url.clone(), chat_request_body(&self.model, turns));
        }

        let messages: Vec<ChatMessage> = turns.iter().map(to_chat_message).collect();
        self.provider_stream(&messages).await
    }
}

/// drains `stream` into the full reply. a failure mid-stream fails the whole reply.
pub async fn collect_reply(mut stream: FragmentStream) -> Result<String, ServiceError> {
    let mut reply = String::new();
    let mut fragments = 0usize;
    while let Some(fragment) = stream.next().await {
        reply.push_str(&fragment?);
        fragments += 1;
    }
    debug!(target: "bevy_deepchat", "collect_reply: fragments={} len={}", fragments, reply.len());
    Ok(reply)
}

/// one request end to end; errors are folded into the reply.
pub async fn relay(client: &dyn InferenceClient, turns: &[Turn]) -> ChatReply {
    let result = match client.send(turns).await {
        Ok(stream) => collect_reply(stream).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(text) => ChatReply::Ok(text),
        Err(err) => {
            error!(target: "bevy_deepchat", "chat error: {}", err);
            ChatReply::Error(err.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// plays back canned fragments and records what it was sent.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        pub fragments: Vec<Result<String, String>>,
        pub refuse: Option<String>,
        pub seen: Mutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedClient {
        pub fn replying(fragments: &[&str]) -> Self {
            Self {
                fragments: fragments.iter().map(|f| Ok(f.to_string())).collect(),
                ..default()
            }
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn send(&self, turns: &[Turn]) -> Result<FragmentStream, ServiceError> {
            if turns.is_empty() {
                return Err(ServiceError::EmptyConversation);
            }
            self.seen.lock().unwrap().push(turns.to_vec());
            if let Some(reason) = &self.refuse {
                return Err(ServiceError::Build {
                    base_url: "http://127.0.0.1:11434".into(),
                    model: "test".into(),
                    reason: reason.clone(),
                });
            }
            let items: Vec<Result<String, ServiceError>> = self
                .fragments
                .iter()
                .map(|f| f.clone().map_err(ServiceError::Stream))
                .collect();
            let fragments: FragmentStream = Box::pin(futures_lite::stream::iter(items));
            Ok(fragments)
        }
    }

    #[test]
    fn fragments_concatenate_in_order() {
        let client = ScriptedClient::replying(&["Hi", " there", "!"]);
        let stream = pollster::block_on(client.send(&[Turn::user("Hello")])).unwrap();
        let reply = pollster::block_on(collect_reply(stream)).unwrap();
        assert_eq!(reply, "Hi there!");
    }

    #[test]
    fn failure_after_partial_stream_is_an_error() {
        let client = ScriptedClient {
            fragments: vec![Ok("Hi".into()), Err("connection reset".into())],
            ..default()
        };
        let reply = pollster::block_on(relay(&client, &[Turn::user("Hello")]));
        match reply {
            ChatReply::Error(description) => assert!(description.contains("connection reset")),
            ChatReply::Ok(text) => panic!("expected error, got partial '{text}'"),
        }
    }

    #[test]
    fn relay_sends_the_whole_history() {
        let client = ScriptedClient::replying(&["fine"]);
        let turns = vec![Turn::user("Hello"), Turn::assistant("Hi"), Turn::user("how are you?")];
        let reply = pollster::block_on(relay(&client, &turns));

        assert_eq!(reply, ChatReply::Ok("fine".into()));
        assert_eq!(client.seen.lock().unwrap().as_slice(), &[turns]);
    }

    #[test]
    fn refused_connection_becomes_error_reply() {
        let client = ScriptedClient { refuse: Some("connection refused".into()), ..default() };
        let reply = pollster::block_on(relay(&client, &[Turn::user("Hello")]));
        assert!(!reply.is_ok());
        assert!(reply.display_text().starts_with("Error: "));
        assert!(reply.display_text().contains("connection refused"));
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let client = ScriptedClient::replying(&["never"]);
        let reply = pollster::block_on(relay(&client, &[]));
        assert_eq!(reply, ChatReply::Error(ServiceError::EmptyConversation.to_string()));
        assert!(client.seen.lock().unwrap().is_empty());
    }

    /// answers exactly one request with `status` and `payload`; yields the request body.
    fn serve_once(status: &'static str, payload: String) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{BufRead, BufReader, Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            let mut length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).unwrap();
            write!(
                socket,
                "HTTP/1.1 {status}\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                payload.len()
            )
            .unwrap();
            String::from_utf8(body).unwrap()
        });
        (base_url, handle)
    }

    fn ollama_client(base_url: String) -> LlmClient {
        LlmClient::from_config(&ChatConfig { base_url, model: "m".into(), ..default() }).unwrap()
    }

    fn chunk(content: &str, done: bool) -> String {
        serde_json::json!({
            "model": "m",
            "message": { "role": "assistant", "content": content },
            "done": done,
        })
        .to_string()
            + "\n"
    }

    #[test]
    fn default_client_streams_ollama_chat() {
        let payload = chunk("Hi", false) + &chunk(" there!", false) + &chunk("", true);
        let (base_url, server) = serve_once("200 OK", payload);
        let client = ollama_client(base_url);

        let stream = pollster::block_on(client.send(&[Turn::user("Hello")])).unwrap();
        let fragments: Vec<String> =
            pollster::block_on(stream.map(|fragment| fragment.unwrap()).collect());
        assert_eq!(fragments, vec!["Hi".to_string(), " there!".to_string()]);

        let body: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body["stream"], serde_json::json!(true));
        assert_eq!(body["model"], serde_json::json!("m"));
        assert_eq!(body["messages"], serde_json::json!([{ "role": "user", "content": "Hello" }]));
    }

    #[test]
    fn ollama_error_status_becomes_error_reply() {
        let payload = r#"{"error":"model \"m\" not found, try pulling it first"}"#.to_string();
        let (base_url, server) = serve_once("404 Not Found", payload);
        let reply = pollster::block_on(relay(&ollama_client(base_url), &[Turn::user("Hello")]));
        server.join().unwrap();

        match reply {
            ChatReply::Error(description) => {
                assert!(description.contains("404"));
                assert!(description.contains("not found, try pulling it first"));
            }
            ChatReply::Ok(text) => panic!("expected error, got '{text}'"),
        }
    }

    #[test]
    fn ollama_error_line_fails_the_reply() {
        let payload = chunk("Hi", false) + "{\"error\":\"out of memory\"}\n";
        let (base_url, server) = serve_once("200 OK", payload);
        let reply = pollster::block_on(relay(&ollama_client(base_url), &[Turn::user("Hello")]));
        server.join().unwrap();

        assert_eq!(
            reply,
            ChatReply::Error(ServiceError::Stream("out of memory".into()).to_string())
        );
    }

    #[test]
    fn chat_url_joins_base() {
        assert_eq!(chat_url("http://127.0.0.1:11434/"), "http://127.0.0.1:11434/api/chat");
        assert_eq!(chat_url("http://h:1"), "http://h:1/api/chat");
    }
}
