//! Ollama chat client.
//!
//! Sends `/api/chat` requests in buffered or streaming mode, separates
//! thinking from the answer, and manages the HTTP pool across model switches.

use std::time::Duration;

use futures::future::Either;
use futures::stream::{self, Stream};
use reqwest::Client as HttpClient;
use uuid::Uuid;

use super::cancel::CancellationGate;
use super::capability::{CapabilityCache, CapabilityProbe, ImageSupport};
use super::classifier::StreamClassifier;
use super::config::ClientConfig;
use super::errors::InferenceError;
use super::streaming::{classify_stream, parse_buffered_response};
use super::think_tags::{ThinkTags, THINKING_SEPARATOR};
use super::types::{
    ChatReply, ChatRequest, ClassifiedEvent, Message, Role, TagsResponse, WireMessage,
};

/// Timeout for the model listing call.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Request projection ──────────────────────────────────────────────────────

/// Project conversation messages into a `/api/chat` request.
///
/// Thinking is never sent. Images travel only on the most recent user
/// message that has any, and not at all when the model is known not to
/// accept them.
pub fn build_chat_request(
    model: &str,
    messages: &[Message],
    stream: bool,
    image_support: ImageSupport,
) -> ChatRequest {
    let image_index = if image_support == ImageSupport::Unsupported {
        None
    } else {
        messages
            .iter()
            .rposition(|m| m.role == Role::User && !m.images.is_empty())
    };

    let messages = messages
        .iter()
        .enumerate()
        .map(|(i, m)| WireMessage {
            role: m.role,
            content: m.content.clone(),
            images: (Some(i) == image_index)
                .then(|| m.images.iter().map(|img| img.data.clone()).collect()),
        })
        .collect();

    ChatRequest {
        model: model.to_string(),
        messages,
        stream,
    }
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for one Ollama server.
///
/// The HTTP pool is shared by all calls on this instance and rebuilt when the
/// model changes. The first call after a switch gets the longer reload
/// timeout to absorb the model load.
pub struct InferenceClient {
    http: HttpClient,
    config: ClientConfig,
    probe: CapabilityProbe,
    /// Set by `set_model`, consumed by the next request.
    reload_pending: bool,
}

impl InferenceClient {
    /// Create a client with its own capability cache.
    ///
    /// Does NOT check connectivity; the first request does.
    pub fn new(config: ClientConfig) -> Result<Self, InferenceError> {
        Self::with_cache(config, CapabilityCache::new())
    }

    /// Create a client sharing an existing capability cache.
    pub fn with_cache(config: ClientConfig, cache: CapabilityCache) -> Result<Self, InferenceError> {
        let http = build_http_client(&config)?;
        let probe = CapabilityProbe::new(cache, config.vision_keywords.clone());
        Ok(Self {
            http,
            config,
            probe,
            reload_pending: false,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn think_tags(&self) -> &ThinkTags {
        &self.config.think_tags
    }

    /// Whether the next request will use the reload timeout.
    pub fn reload_pending(&self) -> bool {
        self.reload_pending
    }

    /// Switch to another model.
    ///
    /// A real change drops the pooled connections and arms the reload
    /// timeout for the next call. Re-selecting the current model is a no-op.
    pub fn set_model(&mut self, model: &str) -> Result<(), InferenceError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model name is empty".into(),
            });
        }
        if model == self.config.model {
            return Ok(());
        }

        self.http = build_http_client(&self.config)?;
        tracing::info!(from = %self.config.model, to = %model, "model switched, connection pool reset");
        self.config.model = model.to_string();
        self.reload_pending = true;
        Ok(())
    }

    /// Image support of the current model.
    pub async fn supports_images(&self) -> ImageSupport {
        self.probe
            .supports_images(&self.http, &self.config.host, &self.config.model)
            .await
    }

    /// Pick the timeout for the next request and disarm the reload flag.
    fn take_timeout(&mut self, steady: Duration) -> Duration {
        if std::mem::take(&mut self.reload_pending) {
            self.config.reload_timeout().max(steady)
        } else {
            steady
        }
    }

    async fn build_request(&self, messages: &[Message], stream: bool) -> ChatRequest {
        let has_images = messages.iter().any(|m| !m.images.is_empty());
        let support = if has_images {
            self.supports_images().await
        } else {
            ImageSupport::Unknown
        };
        if has_images && support == ImageSupport::Unsupported {
            tracing::warn!(model = %self.config.model, "model does not accept images, sending text only");
        }
        build_chat_request(&self.config.model, messages, stream, support)
    }

    /// POST the request and check the status.
    async fn send(
        &self,
        body: &ChatRequest,
        timeout: Duration,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = format!("{}/api/chat", self.config.host);
        let request_id = Uuid::new_v4();

        tracing::info!(
            %request_id,
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            has_images = body.messages.iter().any(|m| m.images.is_some()),
            stream = body.stream,
            timeout_secs = timeout.as_secs(),
            "=== LLM REQUEST ==="
        );

        let response = self
            .http
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| InferenceError::from_transport(&e, &url, timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(%request_id, status = status.as_u16(), body = %body_text, "chat request rejected");
            return Err(InferenceError::from_http_body(status.as_u16(), url, &body_text));
        }
        Ok(response)
    }

    // ─── Chat (buffered) ─────────────────────────────────────────────────

    /// Send a non-streaming chat request.
    ///
    /// Thinking from the explicit field and from inline tags is merged, in
    /// that order.
    pub async fn chat(&mut self, messages: &[Message]) -> Result<ChatReply, InferenceError> {
        let timeout = self.take_timeout(self.config.request_timeout());
        let body = self.build_request(messages, false).await;
        let response = self.send(&body, timeout).await?;

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: timeout.as_secs(),
                }
            } else {
                InferenceError::StreamError {
                    reason: format!("failed to read response body: {e}"),
                }
            }
        })?;
        let (content, explicit) =
            parse_buffered_response(&text).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse chat response: {e}"),
            })?;

        let (inline, answer) = self.config.think_tags.extract(&content);
        let thinking = match (explicit, inline) {
            (Some(a), Some(b)) => Some(format!("{a}{THINKING_SEPARATOR}{b}")),
            (a, b) => a.or(b),
        };

        tracing::info!(
            content_len = answer.len(),
            thinking_len = thinking.as_ref().map(|t| t.len()).unwrap_or(0),
            "=== MODEL RESPONSE ==="
        );
        Ok(ChatReply {
            content: answer,
            thinking,
        })
    }

    // ─── Chat (streaming) ────────────────────────────────────────────────

    /// Send a streaming chat request.
    ///
    /// Never fails outright: a request that cannot be sent or is rejected
    /// becomes a single `error` event. Otherwise events arrive as the body
    /// is read and end with `done`, `error`, or nothing if `gate` fires.
    pub async fn chat_stream<G>(
        &mut self,
        messages: &[Message],
        gate: G,
    ) -> impl Stream<Item = ClassifiedEvent>
    where
        G: CancellationGate,
    {
        let timeout = self.take_timeout(self.config.stream_timeout());
        let body = self.build_request(messages, true).await;

        match self.send(&body, timeout).await {
            Ok(response) => {
                let classifier = StreamClassifier::new(self.config.think_tags.clone());
                Either::Left(classify_stream(
                    Box::pin(response.bytes_stream()),
                    classifier,
                    gate,
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "streaming chat request failed");
                Either::Right(stream::once(async move {
                    ClassifiedEvent::error(e.to_string())
                }))
            }
        }
    }

    // ─── Models ──────────────────────────────────────────────────────────

    /// Names of the models installed on the server.
    ///
    /// Failures are logged and yield an empty list.
    pub async fn list_models(&self) -> Vec<String> {
        let url = format!("{}/api/tags", self.config.host);
        let result = async {
            let response = self
                .http
                .get(&url)
                .timeout(LIST_TIMEOUT)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if !response.status().is_success() {
                return Err(format!("HTTP {}", response.status().as_u16()));
            }
            response
                .json::<TagsResponse>()
                .await
                .map_err(|e| e.to_string())
        }
        .await;

        match result {
            Ok(tags) => tags.models.into_iter().map(|m| m.name).collect(),
            Err(reason) => {
                tracing::error!(url = %url, reason = %reason, "failed to list models");
                Vec::new()
            }
        }
    }

    /// Make sure the configured model is installed.
    ///
    /// When the server lists models and the configured one is not among them,
    /// switch to the first listed model. Returns the models seen (or just the
    /// current one when the list is unavailable).
    pub async fn ensure_available_model(&mut self) -> Result<Vec<String>, InferenceError> {
        let models = self.list_models().await;
        if models.is_empty() {
            return Ok(vec![self.config.model.clone()]);
        }
        if !models.iter().any(|m| model_matches(m, &self.config.model)) {
            let first = models[0].clone();
            tracing::info!(configured = %self.config.model, selected = %first, "configured model not installed, auto-selecting");
            self.set_model(&first)?;
        }
        Ok(models)
    }
}

/// Ollama reports `name:tag`; a bare configured name means `:latest`.
fn model_matches(installed: &str, configured: &str) -> bool {
    installed == configured
        || (!configured.contains(':') && installed == format!("{configured}:latest"))
}

fn build_http_client(config: &ClientConfig) -> Result<HttpClient, InferenceError> {
    HttpClient::builder()
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(|e| InferenceError::ConnectionFailed {
            endpoint: config.host.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::cancel::NeverCancel;
    use crate::inference::types::Image;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn image() -> Image {
        Image::from_bytes(b"png-bytes", "image/png").unwrap()
    }

    fn client_for(server: &MockServer, model: &str) -> InferenceClient {
        let config = ClientConfig {
            host: server.uri(),
            model: model.to_string(),
            ..ClientConfig::default()
        };
        InferenceClient::new(config).unwrap()
    }

    fn ndjson(lines: &[serde_json::Value]) -> String {
        lines.iter().map(|l| format!("{l}\n")).collect()
    }

    #[test]
    fn test_request_keeps_order_and_strips_thinking() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello").with_thinking(Some("greet back".into())),
            Message::user("again"),
        ];
        let req = build_chat_request("m", &messages, true, ImageSupport::Unknown);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            json!({
                "model": "m",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "again"},
                ],
                "stream": true,
            })
        );
    }

    #[test]
    fn test_images_only_on_latest_user_message() {
        let messages = vec![
            Message::user("first").with_images(vec![image()]),
            Message::assistant("ok"),
            Message::user("second").with_images(vec![image(), image()]),
            Message::user("follow-up without image"),
        ];
        let req = build_chat_request("m", &messages, false, ImageSupport::Supported);
        assert!(req.messages[0].images.is_none());
        assert_eq!(req.messages[2].images.as_ref().map(Vec::len), Some(2));
        assert!(req.messages[3].images.is_none());
    }

    #[test]
    fn test_images_dropped_when_unsupported() {
        let messages = vec![Message::user("look").with_images(vec![image()])];
        let req = build_chat_request("m", &messages, false, ImageSupport::Unsupported);
        assert!(req.messages[0].images.is_none());
        let req = build_chat_request("m", &messages, false, ImageSupport::Unknown);
        assert_eq!(req.messages[0].images, Some(vec![image().data]));
    }

    #[test]
    fn test_set_model_arms_reload_once() {
        let mut client = InferenceClient::new(ClientConfig::default()).unwrap();
        client.set_model("gemma3").unwrap();
        assert!(!client.reload_pending(), "same model is a no-op");

        client.set_model("qwen3:8b").unwrap();
        assert_eq!(client.model(), "qwen3:8b");
        assert!(client.reload_pending());

        let steady = client.config().request_timeout();
        assert_eq!(client.take_timeout(steady), client.config().reload_timeout());
        assert!(!client.reload_pending());
        assert_eq!(client.take_timeout(steady), steady);

        assert!(client.set_model("  ").is_err());
    }

    #[test]
    fn test_model_matches_latest_tag() {
        assert!(model_matches("gemma3:latest", "gemma3"));
        assert!(model_matches("gemma3:4b", "gemma3:4b"));
        assert!(!model_matches("gemma3:4b", "gemma3"));
    }

    #[tokio::test]
    async fn test_chat_buffered_extracts_thinking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "qwen3", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "qwen3",
                "message": {
                    "role": "assistant",
                    "content": "<think>inline</think>\n\nFour.",
                    "thinking": "explicit"
                },
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server, "qwen3");
        let reply = client.chat(&[Message::user("2+2?")]).await.unwrap();
        assert_eq!(reply.content, "Four.");
        assert_eq!(reply.thinking.as_deref(), Some("explicit\n\ninline"));
    }

    #[tokio::test]
    async fn test_chat_http_error_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "model \"nope\" not found"})),
            )
            .mount(&server)
            .await;

        let mut client = client_for(&server, "nope");
        let err = client.chat(&[Message::user("hi")]).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        let text = err.to_string();
        assert!(text.contains("/api/chat"), "{text}");
        assert!(text.ends_with("model \"nope\" not found"), "{text}");
    }

    #[tokio::test]
    async fn test_chat_stream_end_to_end() {
        let server = MockServer::start().await;
        let body = ndjson(&[
            json!({"message": {"role": "assistant", "content": "Hel"}, "done": false}),
            json!({"message": {"role": "assistant", "content": "lo <thi"}, "done": false}),
            json!({"message": {"role": "assistant", "content": "nk>sec"}, "done": false}),
            json!({"message": {"role": "assistant", "content": "ret</think> world"}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true, "done_reason": "stop"}),
        ]);
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let mut client = client_for(&server, "deepseek-r1");
        let events: Vec<_> = client
            .chat_stream(&[Message::user("tell me")], NeverCancel)
            .await
            .collect()
            .await;

        let mut response = String::new();
        let mut thinking = String::new();
        for e in &events {
            match e {
                ClassifiedEvent::Response { content } => response.push_str(content),
                ClassifiedEvent::Thinking { content } => thinking.push_str(content),
                _ => {}
            }
        }
        assert_eq!(response, "Hello  world");
        assert_eq!(thinking, "secret");
        assert_eq!(events.last(), Some(&ClassifiedEvent::Done));
    }

    #[tokio::test]
    async fn test_chat_stream_rejection_is_single_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("kaboom"))
            .mount(&server)
            .await;

        let mut client = client_for(&server, "m");
        let events: Vec<_> = client
            .chat_stream(&[Message::user("hi")], NeverCancel)
            .await
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ClassifiedEvent::Error { content } if content.contains("HTTP 500")));
    }

    #[tokio::test]
    async fn test_chat_stream_unreachable_server() {
        let config = ClientConfig {
            host: "http://127.0.0.1:9".into(),
            ..ClientConfig::default()
        };
        let mut client = InferenceClient::new(config).unwrap();
        let events: Vec<_> = client
            .chat_stream(&[Message::user("hi")], NeverCancel)
            .await
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ClassifiedEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_images_dropped_for_text_only_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"capabilities": ["completion"]})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "text only"}
            })))
            .mount(&server)
            .await;

        let mut client = client_for(&server, "phi3");
        let messages = vec![Message::user("what is this?").with_images(vec![image()])];
        let reply = client.chat(&messages).await.unwrap();
        assert_eq!(reply.content, "text only");

        let requests = server.received_requests().await.unwrap();
        let chat = requests
            .iter()
            .find(|r| r.url.path() == "/api/chat")
            .unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&chat.body).unwrap();
        assert!(sent["messages"][0].get("images").is_none());
    }

    #[tokio::test]
    async fn test_list_models_and_auto_select() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.2:latest"}, {"name": "qwen3:8b"}]
            })))
            .mount(&server)
            .await;

        let mut client = client_for(&server, "gemma3");
        let models = client.ensure_available_model().await.unwrap();
        assert_eq!(models, vec!["llama3.2:latest", "qwen3:8b"]);
        assert_eq!(client.model(), "llama3.2:latest");
        assert!(client.reload_pending());
    }

    #[tokio::test]
    async fn test_list_models_failure_keeps_current() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut client = client_for(&server, "gemma3");
        assert!(client.list_models().await.is_empty());
        let models = client.ensure_available_model().await.unwrap();
        assert_eq!(models, vec!["gemma3"]);
        assert_eq!(client.model(), "gemma3");
        assert!(!client.reload_pending());
    }
}
