use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;

use crate::server::ToolServer;

/// Build the Tool Server's two-route HTTP surface (§4.6/§6): SSE on
/// `/sse/:agent_id`, paired tool-call POST on `/messages/:agent_id`.
pub fn router(server: Arc<ToolServer>) -> Router {
    Router::new()
        .route("/sse/:agent_id", get(sse_handler))
        .route("/messages/:agent_id", post(messages_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    id: String,
    tool: String,
    #[serde(default)]
    args: Value,
}

async fn sse_handler(
    Path(agent_id): Path<String>,
    State(server): State<Arc<ToolServer>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let session = server.session_for(&agent_id).await;
    let (tx, rx) = mpsc::unbounded_channel();
    session.attach(tx).await;

    let stream = UnboundedReceiverStream::new(rx).map(|payload| Ok(Event::default().data(payload)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn messages_handler(
    Path(agent_id): Path<String>,
    State(server): State<Arc<ToolServer>>,
    Json(request): Json<ToolCallRequest>,
) -> impl IntoResponse {
    let session = server.session_for(&agent_id).await;
    tokio::spawn(async move {
        let result = server.dispatch(&agent_id, &request.tool, request.args).await;
        let payload = json!({ "id": request.id, "result": result }).to_string();
        session.send(payload).await;
    });
    // The actual result arrives on the paired SSE channel; the POST only
    // acknowledges receipt.
    StatusCode::ACCEPTED
}
