//! OpenAI-compatible `chat/completions` streaming backend

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{StreamExt, stream};
use relay_channel::Channel;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use url::Url;

use super::{Chunk, GenerateRequest, Upstream, UpstreamEvent, UpstreamStream, Usage};
use crate::UpstreamError;

/// Streams generations from OpenAI-compatible endpoints
#[derive(Clone, Default)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Only the canonical API is sent `stream_options`; many compatible
/// servers reject the unknown field
fn is_canonical_openai(base_url: &Url) -> bool {
    base_url.host_str().is_some_and(|h| h == "api.openai.com")
}

fn completions_url(base_url: &Url) -> String {
    let base = base_url.as_str().trim_end_matches('/');
    format!("{base}/chat/completions")
}

fn wire_body(channel: &Channel, request: &GenerateRequest) -> Value {
    let mut body = match &request.payload {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    body.insert("model".to_owned(), Value::String(request.model.clone()));
    body.insert("stream".to_owned(), Value::Bool(true));

    if is_canonical_openai(&channel.base_url) {
        body.insert("stream_options".to_owned(), json!({ "include_usage": true }));
    } else {
        body.remove("stream_options");
    }

    Value::Object(body)
}

/// Translate one SSE `data:` payload into upstream events
fn parse_event(data: &str) -> Vec<Result<UpstreamEvent, UpstreamError>> {
    let data = data.trim();
    if data == "[DONE]" {
        return vec![Ok(UpstreamEvent::Done)];
    }

    let raw: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => return vec![Err(UpstreamError::Decode(e.to_string()))],
    };

    if let Some(error) = raw.get("error") {
        return vec![Err(UpstreamError::Decode(format!("upstream error event: {error}")))];
    }

    let mut events = Vec::with_capacity(2);

    if let Some(choices) = raw.get("choices").and_then(Value::as_array)
        && !choices.is_empty()
    {
        let text: String = choices
            .iter()
            .filter_map(|choice| choice.pointer("/delta/content").and_then(Value::as_str))
            .collect();

        events.push(Ok(UpstreamEvent::Chunk(Chunk {
            text,
            raw: raw.clone(),
        })));
    }

    if let Some(usage) = raw.get("usage").filter(|u| !u.is_null()) {
        let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);

        events.push(Ok(UpstreamEvent::Usage(Usage {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
        })));
    }

    events
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn generate(&self, channel: &Channel, request: &GenerateRequest) -> Result<UpstreamStream, UpstreamError> {
        let mut builder = self
            .client
            .post(completions_url(&channel.base_url))
            .header("x-request-id", &request.request_id)
            .json(&wire_body(channel, request));

        if let Some(credential) = &channel.credential {
            builder = builder.bearer_auth(credential.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(channel_id = channel.id, error = %e, "upstream request failed");
            UpstreamError::Request(e.to_string())
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(channel_id = channel.id, status, "upstream returned error");
            return Err(UpstreamError::Status { status, body });
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|result| match result {
                Ok(event) => parse_event(&event.data),
                Err(e) => vec![Err(UpstreamError::Decode(e.to_string()))],
            })
            .flat_map(stream::iter);

        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use futures_util::TryStreamExt;
    use secrecy::SecretString;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{bearer_token, body_partial_json, method, path},
    };

    use super::*;

    fn channel(base_url: &str) -> Channel {
        Channel {
            id: 1,
            name: None,
            base_url: Url::parse(base_url).unwrap(),
            credential: Some(SecretString::from("sk-test")),
            enabled: true,
            priority: 0,
            weight: 0,
            groups: BTreeSet::from(["default".to_owned()]),
            models: BTreeSet::from(["gpt-4o-mini".to_owned()]),
            tag: None,
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            request_id: "req-1".into(),
            model: "gpt-4o-mini".into(),
            payload: json!({"messages": [{"role": "user", "content": "hi"}], "stream": false}),
        }
    }

    fn sse(chunks: &[&str]) -> String {
        chunks.iter().map(|c| format!("data: {c}\n\n")).collect()
    }

    #[test]
    fn parse_done_marker() {
        assert_eq!(parse_event("[DONE]"), vec![Ok(UpstreamEvent::Done)]);
    }

    #[test]
    fn parse_chunk_with_usage() {
        let events = parse_event(
            r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}],"usage":{"prompt_tokens":3,"completion_tokens":9}}"#,
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(UpstreamEvent::Chunk(chunk)) if chunk.text == "Hel"));
        assert_eq!(
            events[1],
            Ok(UpstreamEvent::Usage(Usage {
                prompt_tokens: 3,
                completion_tokens: 9
            }))
        );
    }

    #[test]
    fn parse_usage_only_chunk() {
        let events = parse_event(r#"{"choices":[],"usage":{"prompt_tokens":1,"completion_tokens":2}}"#);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(UpstreamEvent::Usage(_))));
    }

    #[test]
    fn parse_garbage_is_decode_error() {
        assert!(matches!(parse_event("{nope").as_slice(), [Err(UpstreamError::Decode(_))]));
    }

    #[test]
    fn wire_body_forces_streaming_and_model() {
        let body = wire_body(&channel("https://compat.example.com/v1"), &request());
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert!(body.get("stream_options").is_none());

        let canonical = wire_body(&channel("https://api.openai.com/v1"), &request());
        assert_eq!(canonical["stream_options"]["include_usage"], true);
    }

    #[tokio::test]
    async fn streams_chunks_from_upstream() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"Hello"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":" world"}}]}"#,
            "[DONE]",
        ]);

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = HttpUpstream::default();
        let stream = upstream
            .generate(&channel(&format!("{}/v1", server.uri())), &request())
            .await
            .unwrap();

        let events: Vec<UpstreamEvent> = stream.try_collect().await.unwrap();
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                UpstreamEvent::Chunk(chunk) => Some(chunk.text.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(text, "Hello world");
        assert_eq!(events.last(), Some(&UpstreamEvent::Done));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let result = HttpUpstream::default()
            .generate(&channel(&format!("{}/v1", server.uri())), &request())
            .await;

        assert_eq!(
            result.err(),
            Some(UpstreamError::Status {
                status: 503,
                body: "overloaded".into()
            })
        );
    }
}
