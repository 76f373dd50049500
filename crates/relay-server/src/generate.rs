//! `POST /v1/generate`

use std::{convert::Infallible, pin::Pin};

use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
    },
};
use futures_util::{Stream, StreamExt, stream};
use http::HeaderMap;
use relay_core::{HttpError, TenantIdentity};
use relay_pipeline::{Admission, ClientEvent, ClientLink, PipelineError, upstream::Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{ApiError, error::error_response, state::AppState};

/// Events buffered between the pipeline and a slow client
const CLIENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateBody {
    pub model: String,
    /// Provider-shaped request payload
    pub payload: Value,
    #[serde(default)]
    pub stream: bool,
}

/// Aggregated non-streaming response
#[derive(Debug, Serialize)]
struct GenerateResponse {
    id: String,
    model: String,
    content: String,
    usage: Usage,
    interrupted: bool,
}

pub async fn generate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> Response {
    let Some(identity) = TenantIdentity::from_headers(&headers) else {
        return ApiError::BadRequest("x-tenant-id header is required".to_owned()).into_response();
    };

    let admission = Admission {
        tenant_id: identity.tenant_id,
        group: identity.group,
        model: body.model.clone(),
        payload: body.payload,
        stream: body.stream,
    };

    let (client, mut events) = ClientLink::channel(CLIENT_BUFFER);
    let execution = state.orchestrator.spawn(admission, client);

    // Errors before the first increment are reported with a proper status
    let first = match events.recv().await {
        Some(ClientEvent::Failed(error)) => return error_response(&error),
        Some(event) => event,
        None => return missing_result(),
    };

    if body.stream {
        return stream_response(first, events).into_response();
    }

    let mut content = String::new();
    let mut outcome = None;

    let mut next = Some(first);
    while let Some(event) = next {
        match event {
            ClientEvent::Chunk(chunk) => content.push_str(&chunk.text),
            ClientEvent::Completed { usage, interrupted } => outcome = Some((usage, interrupted)),
            ClientEvent::Failed(error) => return error_response(&error),
        }
        next = events.recv().await;
    }

    let request_id = match execution.await {
        Ok(report) => report.request_id,
        Err(e) => {
            tracing::error!(error = %e, "request task panicked");
            String::new()
        }
    };

    let Some((usage, interrupted)) = outcome else {
        return missing_result();
    };

    Json(GenerateResponse {
        id: request_id,
        model: body.model,
        content,
        usage,
        interrupted,
    })
    .into_response()
}

/// The pipeline closed the client link without a terminal event
fn missing_result() -> Response {
    error_response(&ApiError::Internal("request ended without a result".to_owned()))
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// SSE increments followed by a usage event and `[DONE]`
///
/// Dropping the response drops the receiver, which the pipeline observes as
/// a client disconnect.
fn stream_response(first: ClientEvent, rx: mpsc::Receiver<ClientEvent>) -> Sse<KeepAliveStream<EventStream>> {
    let rest = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) });

    let events: EventStream = Box::pin(
        stream::once(async move { first })
            .chain(rest)
            .flat_map(|event| stream::iter(sse_events(event)))
            .map(Ok),
    );

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sse_events(event: ClientEvent) -> Vec<Event> {
    match event {
        ClientEvent::Chunk(chunk) => vec![Event::default().data(chunk.raw.to_string())],
        ClientEvent::Completed { usage, interrupted } => {
            let data = serde_json::json!({
                "usage": usage,
                "interrupted": interrupted,
            });
            vec![Event::default().data(data.to_string()), Event::default().data("[DONE]")]
        }
        ClientEvent::Failed(error) => vec![stream_error(&error)],
    }
}

fn stream_error(error: &PipelineError) -> Event {
    let data = serde_json::json!({
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        }
    });
    Event::default().data(data.to_string())
}
