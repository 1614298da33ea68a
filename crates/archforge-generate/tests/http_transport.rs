use std::sync::Arc;
use std::time::Duration;

use archforge_generate::provider::default_routes;
use archforge_generate::transport::HttpChatTransport;
use archforge_generate::{
    ChatMessage, ChatRequest, ChatTransport, GenerateError, GenerateRequest, Generator,
    GeneratorConfig, NetworkCause, ProviderDescriptor, ProviderError, ProviderId,
    ProviderRegistry, RetryPolicy,
};
use futures::StreamExt;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(chunks: &[&str]) -> String {
    let mut body = String::new();
    body.push_str(": keep-alive\n\n");
    body.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    for chunk in chunks {
        let event = json!({ "choices": [{ "delta": { "content": chunk } }] });
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(chunks: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse(chunks), "text/event-stream")
}

fn descriptor(id: ProviderId, base_url: &str) -> ProviderDescriptor {
    let mut d = ProviderDescriptor::builtin(id);
    d.base_url = base_url.to_string();
    d.api_key = Some("sk-test".to_string());
    d
}

fn request(d: &ProviderDescriptor) -> ChatRequest {
    ChatRequest {
        system: "You are an architect.".to_string(),
        messages: vec![ChatMessage::user("a todo app")],
        model: d.model.clone(),
        options: d.options.clone(),
    }
}

fn transport() -> HttpChatTransport {
    HttpChatTransport::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn streams_content_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "deepseek-chat",
            "stream": true,
            "response_format": { "type": "json_object" }
        })))
        .respond_with(sse_response(&["{\"nodes\":", "[],", "\"edges\":[]}"]))
        .expect(1)
        .mount(&server)
        .await;

    let d = descriptor(ProviderId::DeepSeek, &server.uri());
    let stream = transport().open_stream(&d, &request(&d)).await.unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks.concat(), "{\"nodes\":[],\"edges\":[]}");
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(json!({ "error": { "message": "Rate limit reached" } })),
        )
        .mount(&server)
        .await;

    let d = descriptor(ProviderId::OpenAi, &server.uri());
    let err = match transport().open_stream(&d, &request(&d)).await {
        Err(err) => err,
        Ok(_) => panic!("expected an error"),
    };
    match err {
        ProviderError::Http {
            status,
            message,
            retry_after,
        } => {
            assert_eq!(status, 429);
            assert_eq!(message, "Rate limit reached");
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    // nothing listens on port 9 (discard) locally
    let d = descriptor(ProviderId::Groq, "http://127.0.0.1:9");
    let err = match transport().open_stream(&d, &request(&d)).await {
        Err(err) => err,
        Ok(_) => panic!("expected an error"),
    };
    assert!(matches!(err, ProviderError::Network { .. }), "{err:?}");
}

#[tokio::test]
async fn in_band_error_ends_stream() {
    let server = MockServer::start().await;
    let body = format!(
        "{}data: {{\"error\":{{\"message\":\"model overloaded\"}}}}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"{\"}}]}\n\n"
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let d = descriptor(ProviderId::DeepSeek, &server.uri());
    let items: Vec<Result<String, ProviderError>> = transport()
        .open_stream(&d, &request(&d))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "{");
    assert_eq!(
        items[1].as_ref().unwrap_err().to_string(),
        "stream error: model overloaded"
    );
}

/// Serves one SSE response over raw TCP, writing a content delta every `gap`.
/// Without `finish` the connection stays open and silent afterwards.
async fn drip_server(chunks: &'static [&'static str], gap: Duration, finish: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for chunk in chunks {
            tokio::time::sleep(gap).await;
            let event = json!({ "choices": [{ "delta": { "content": chunk } }] });
            if socket
                .write_all(format!("data: {event}\n\n").as_bytes())
                .await
                .is_err()
            {
                return;
            }
        }
        if finish {
            let _ = socket.write_all(b"data: [DONE]\n\n").await;
            let _ = socket.shutdown().await;
        } else {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    });
    format!("http://{addr}")
}

async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        data.extend_from_slice(&buf[..n]);
        let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= end + 4 + length {
            return;
        }
    }
}

#[tokio::test]
async fn long_stream_outlives_idle_timeout() {
    let url = drip_server(&["a", "b", "c", "d"], Duration::from_millis(400), true).await;
    let d = descriptor(ProviderId::DeepSeek, &url);
    let transport = HttpChatTransport::new(Duration::from_secs(1)).unwrap();

    let started = std::time::Instant::now();
    let items: Vec<Result<String, ProviderError>> =
        transport.open_stream(&d, &request(&d)).await.unwrap().collect().await;
    let tokens: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
    assert_eq!(tokens, ["a", "b", "c", "d"]);
    assert!(started.elapsed() > Duration::from_secs(1));
}

#[tokio::test]
async fn silent_stream_fails_with_timeout() {
    let url = drip_server(&["a"], Duration::from_millis(50), false).await;
    let d = descriptor(ProviderId::DeepSeek, &url);
    let transport = HttpChatTransport::new(Duration::from_millis(500)).unwrap();

    let items: Vec<Result<String, ProviderError>> =
        transport.open_stream(&d, &request(&d)).await.unwrap().collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "a");
    assert!(matches!(
        items[1],
        Err(ProviderError::Network {
            cause: NetworkCause::Timeout,
            ..
        })
    ));
}

fn fast_config() -> GeneratorConfig {
    GeneratorConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        },
        ..GeneratorConfig::default()
    }
}

fn generator(primary_url: &str, fallback_url: &str) -> Generator {
    let descriptors = ProviderId::ALL
        .into_iter()
        .map(|id| match id {
            ProviderId::DeepSeek => descriptor(id, primary_url),
            ProviderId::OpenAi => descriptor(id, fallback_url),
            other => ProviderDescriptor::builtin(other),
        })
        .collect();
    let registry = ProviderRegistry::new(descriptors, default_routes()).unwrap();
    Generator::new(registry, Arc::new(transport()), fast_config()).unwrap()
}

const GRAPH: &str = r#"{"nodes":[{"id":"web","type":"frontend","data":{"label":"Web","tech":"react","serviceType":"frontend"}},{"id":"db","type":"database","data":{"label":"DB","tech":"postgres","serviceType":"database"}}],"edges":[{"id":"e1","source":"web","target":"db"}]}"#;

#[tokio::test]
async fn unavailable_primary_falls_back_over_http() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(2)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "model": "gpt-4.1-mini" })))
        .respond_with(sse_response(&[&GRAPH[..40], &GRAPH[40..]]))
        .expect(1)
        .mount(&fallback)
        .await;

    let generator = generator(&primary.uri(), &fallback.uri());
    let output = generator
        .generate_graph(GenerateRequest::new("a web app with a database"))
        .await
        .unwrap();

    assert_eq!(output.provider, ProviderId::OpenAi);
    assert_eq!(output.raw, GRAPH);
    let graph = output.processed.graph.expect("valid graph");
    assert_eq!(graph.nodes[1].data.tech.as_deref(), Some("postgresql"));
    assert_eq!(output.processed.laid_out, 2);
    assert_eq!(generator.breaker().status(ProviderId::DeepSeek).failures, 1);
}

#[tokio::test]
async fn rate_limited_primary_is_called_once() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse_response(&["{}"]))
        .expect(1)
        .mount(&fallback)
        .await;

    let generator = generator(&primary.uri(), &fallback.uri());
    let mut stream = generator.generate(GenerateRequest::new("x")).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "{}");
}

#[tokio::test]
async fn both_providers_failing_surfaces_fallback_error() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "error": { "message": "Incorrect API key provided" } })),
        )
        .mount(&fallback)
        .await;

    let generator = generator(&primary.uri(), &fallback.uri());
    let err = match generator.generate(GenerateRequest::new("x")).await {
        Err(err) => err,
        Ok(_) => panic!("expected an error"),
    };
    assert!(matches!(
        err,
        GenerateError::Provider {
            provider: ProviderId::OpenAi,
            ..
        }
    ));
    assert!(err.to_string().contains("Incorrect API key provided"));
}
