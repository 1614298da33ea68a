use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use llm::builder::{LLMBackend, LLMBuilder};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{GenerateError, NetworkCause, ProviderError};
use crate::provider::{NativeBackend, ProviderDescriptor, RequestOptions, Transport};

/// Text chunks as the provider emits them.
pub type ProviderStream = BoxStream<'static, Result<String, ProviderError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One chat completion request. `model` and `options` start from the
/// provider descriptor and may be adjusted per request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub options: RequestOptions,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a streamed completion. Errors returned here are known before any
    /// output; errors inside the stream happen after it started.
    async fn open_stream(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest,
    ) -> Result<ProviderStream, ProviderError>;
}

const SSE_CHANNEL_CAPACITY: usize = 100;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible `/chat/completions` over SSE.
///
/// There is no deadline on the whole request: a stream may run as long as
/// the provider keeps sending. `idle_timeout` bounds the handshake, the wait
/// for response headers and every gap between body chunks.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    idle_timeout: Duration,
}

impl HttpChatTransport {
    pub fn new(idle_timeout: Duration) -> Result<Self, GenerateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(idle_timeout)
            .build()
            .map_err(|e| GenerateError::Config(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            idle_timeout,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn request_body(request: &ChatRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        for m in &request.messages {
            messages.push(json!({ "role": m.role, "content": m.content }));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
        });
        let opts = &request.options;
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = opts.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if let Some(effort) = &opts.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }
        if opts.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if let Value::Object(map) = &mut body {
            for (k, v) in &opts.extra {
                map.insert(k.clone(), v.clone());
            }
        }
        body
    }

    async fn pump<S, B>(
        mut bytes: S,
        tx: mpsc::Sender<Result<String, ProviderError>>,
        idle_timeout: Duration,
    ) -> Result<(), ProviderError>
    where
        S: futures::Stream<Item = Result<B, reqwest::Error>> + Unpin,
        B: AsRef<[u8]>,
    {
        // decoded per complete line; chunks may split UTF-8 sequences
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => {
                    tracing::debug!("stream consumer gone, closing connection");
                    return Ok(());
                }
                next = tokio::time::timeout(idle_timeout, bytes.next()) => next,
            };
            let chunk = match next {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => return Err(idle_expired(idle_timeout)),
            };
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(line) = take_line(&mut buffer) {
                match parse_sse_line(&line)? {
                    SseLine::Content(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            // receiver dropped
                            return Ok(());
                        }
                    }
                    SseLine::Done => return Ok(()),
                    SseLine::Skip => {}
                }
            }
        }
        // a final line without trailing newline
        let rest = String::from_utf8_lossy(&buffer);
        if let SseLine::Content(text) = parse_sse_line(rest.trim_end())? {
            let _ = tx.send(Ok(text)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open_stream(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest,
    ) -> Result<ProviderStream, ProviderError> {
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
        let body = Self::request_body(request);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = provider.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        tracing::debug!(provider = %provider.id, model = %request.model, "opening completion stream");
        let response = tokio::time::timeout(self.idle_timeout, builder.send())
            .await
            .map_err(|_| idle_expired(self.idle_timeout))??;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if let Some(wait) = retry_after {
                tracing::info!(provider = %provider.id, retry_after_ms = wait.as_millis() as u64, "provider sent Retry-After");
            }
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: error_message(&text),
                retry_after,
            });
        }

        let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
        let bytes = response.bytes_stream();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            if let Err(e) = Self::pump(bytes, tx.clone(), idle_timeout).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(receiver_stream(rx))
    }
}

fn idle_expired(idle_timeout: Duration) -> ProviderError {
    ProviderError::Network {
        cause: NetworkCause::Timeout,
        message: format!("no data from provider for {}ms", idle_timeout.as_millis()),
    }
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Content(String),
    Done,
    Skip,
}

fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    let text = String::from_utf8_lossy(&line[..pos]);
    Some(text.trim_end_matches('\r').to_string())
}

fn parse_sse_line(line: &str) -> Result<SseLine, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Stream(format!("bad SSE payload: {e}")))?;
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("provider error")
            .to_string();
        return Err(ProviderError::Stream(message));
    }
    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(text) if !text.is_empty() => Ok(SseLine::Content(text.to_string())),
        _ => Ok(SseLine::Skip),
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    raw.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Native backends through the `llm` crate.
#[derive(Debug, Clone, Default)]
pub struct LlmChatTransport;

fn map_backend(backend: NativeBackend) -> LLMBackend {
    match backend {
        NativeBackend::Anthropic => LLMBackend::Anthropic,
        NativeBackend::Google => LLMBackend::Google,
        NativeBackend::Ollama => LLMBackend::Ollama,
    }
}

#[async_trait]
impl ChatTransport for LlmChatTransport {
    async fn open_stream(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest,
    ) -> Result<ProviderStream, ProviderError> {
        let Transport::Native(backend) = provider.transport else {
            return Err(ProviderError::InvalidRequest(format!(
                "{} is not served by a native backend",
                provider.id
            )));
        };

        let mut builder = LLMBuilder::new()
            .backend(map_backend(backend))
            .model(&request.model)
            .system(&request.system)
            .base_url(&provider.base_url);
        if let Some(key) = provider.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.api_key(key);
        }
        if let Some(t) = request.options.temperature {
            builder = builder.temperature(t);
        }
        if let Some(n) = request.options.max_tokens {
            builder = builder.max_tokens(n);
        }
        let llm = builder
            .build()
            .map_err(|e| ProviderError::InvalidRequest(format!("build LLM: {e}")))?;

        let messages: Vec<llm::chat::ChatMessage> = request
            .messages
            .iter()
            .map(|m| match m.role {
                Role::User => llm::chat::ChatMessage::user().content(&m.content).build(),
                Role::Assistant => llm::chat::ChatMessage::assistant()
                    .content(&m.content)
                    .build(),
            })
            .collect();

        tracing::debug!(provider = %provider.id, model = %request.model, "opening native stream");
        let stream = llm
            .chat_stream(&messages)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        Ok(stream
            .map(|item| item.map_err(|e| ProviderError::Backend(e.to_string())))
            .boxed())
    }
}

/// Default transport: dispatches on the descriptor's transport kind.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: HttpChatTransport,
    native: LlmChatTransport,
}

impl ProviderClient {
    pub fn new(timeout: Duration) -> Result<Self, GenerateError> {
        Ok(Self {
            http: HttpChatTransport::new(timeout)?,
            native: LlmChatTransport,
        })
    }
}

#[async_trait]
impl ChatTransport for ProviderClient {
    async fn open_stream(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest,
    ) -> Result<ProviderStream, ProviderError> {
        match provider.transport {
            Transport::OpenAiCompatible => self.http.open_stream(provider, request).await,
            Transport::Native(_) => self.native.open_stream(provider, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderDescriptor, ProviderId};
    use reqwest::header::HeaderValue;

    #[test]
    fn parses_content_deltas() {
        let line = r#"data: {"choices":[{"delta":{"content":"{\"nodes\""}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseLine::Content("{\"nodes\"".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
    }

    #[test]
    fn in_band_error_becomes_stream_error() {
        let err = parse_sse_line(r#"data: {"error":{"message":"overloaded"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "stream error: overloaded");
    }

    #[test]
    fn take_line_handles_crlf_and_partial_input() {
        let mut buf = "data: a\r\ndata: é".as_bytes().to_vec();
        assert_eq!(take_line(&mut buf).as_deref(), Some("data: a"));
        assert_eq!(take_line(&mut buf), None);
        assert_eq!(buf, "data: é".as_bytes());
    }

    fn delta(text: &str) -> Result<Vec<u8>, reqwest::Error> {
        let event = json!({ "choices": [{ "delta": { "content": text } }] });
        Ok(format!("data: {event}\n\n").into_bytes())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_chunks_within_idle_timeout_are_delivered() {
        let chunks = stream::iter(["a", "b", "c"]).then(|text| async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            delta(text)
        });
        let (tx, mut rx) = mpsc::channel(8);
        let start = tokio::time::Instant::now();
        HttpChatTransport::pump(Box::pin(chunks), tx, Duration::from_secs(1))
            .await
            .unwrap();

        let mut tokens = Vec::new();
        while let Some(item) = rx.recv().await {
            tokens.push(item.unwrap());
        }
        assert_eq!(tokens, ["a", "b", "c"]);
        assert!(start.elapsed() >= Duration::from_millis(2_100));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_hits_idle_timeout() {
        let chunks = stream::iter([delta("a")]).chain(stream::pending());
        let (tx, mut rx) = mpsc::channel(8);
        let err = HttpChatTransport::pump(Box::pin(chunks), tx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Network {
                cause: NetworkCause::Timeout,
                ..
            }
        ));
        assert_eq!(rx.recv().await.unwrap().unwrap(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_consumer_ends_pump_on_stalled_stream() {
        let chunks = stream::pending::<Result<Vec<u8>, reqwest::Error>>();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let start = tokio::time::Instant::now();
        HttpChatTransport::pump(Box::pin(chunks), tx, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1_500)));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn error_message_prefers_structured_body() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(error_message(" upstream down \n"), "upstream down");
    }

    #[test]
    fn body_carries_options_and_extra() {
        let descriptor = ProviderDescriptor::builtin(ProviderId::Groq);
        let mut options = descriptor.options.clone();
        options
            .extra
            .insert("top_p".to_string(), json!(0.9));
        let request = ChatRequest {
            system: "sys".to_string(),
            messages: vec![ChatMessage::user("hi")],
            model: descriptor.model.clone(),
            options,
        };
        let body = HttpChatTransport::request_body(&request);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["model"], json!("openai/gpt-oss-120b"));
        assert_eq!(body["reasoning_effort"], json!("medium"));
        assert_eq!(body["response_format"]["type"], json!("json_object"));
        assert_eq!(body["top_p"], json!(0.9));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1], json!({ "role": "user", "content": "hi" }));
    }
}
