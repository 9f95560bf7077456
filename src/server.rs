use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    chat::{ChatMessage, Dialog, Frame},
    config::Config,
    dialog::DialogManager,
    entity::{ConversationKey, UserId},
    error::ChatError,
    history::HistoryService,
    identity::Identity,
    registry::Registry,
    router::{Inbound, MessageRouter},
    store::Store,
};

const DEFAULT_PAGE_SIZE: i64 = 20;

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct AppState {
    router: Arc<MessageRouter>,
    dialogs: DialogManager,
    history: HistoryService,
    history_max_count: i64,
}

impl AppState {
    pub fn new(store: Store, config: &Config) -> Self {
        let dialogs = DialogManager::new(store.clone());
        let router = MessageRouter::new(
            Arc::new(Registry::new()),
            dialogs.clone(),
            config.outbound_buffer,
        );

        Self {
            router: Arc::new(router),
            history: HistoryService::new(store, dialogs.clone()),
            dialogs,
            history_max_count: config.history_max_count.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.router.registry()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat", get(connect_handler))
        .route("/api/chat/history", get(history_handler))
        .route("/api/chat/dialogs", get(dialogs_handler).delete(clear_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// -----------------------------------------------------------------------------
// Request parameters
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConversationParams {
    to: i64,
    listing: Option<i64>,
}

impl ConversationParams {
    fn key(&self, from: UserId) -> ConversationKey {
        ConversationKey::new(from.0, self.to, self.listing)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    to: i64,
    listing: Option<i64>,
    #[serde(default)]
    page: i64,
    count: Option<i64>,
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

/// GET /ws/chat?to=&listing= -- open a routed chat connection.
async fn connect_handler(
    ws: WebSocketUpgrade,
    Identity(from): Identity,
    Query(params): Query<ConversationParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let key = params.key(from);
    info!(%key, "upgrading chat connection");
    ws.on_upgrade(move |socket| serve_socket(socket, key, state.router))
}

async fn serve_socket(socket: WebSocket, key: ConversationKey, router: Arc<MessageRouter>) {
    let (sink, stream) = socket.split();
    let inbound = stream.map(|msg| msg.map(Inbound::from));
    let outbound =
        sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));

    if let Err(e) = router.run_connection(key, inbound, outbound).await {
        warn!(%key, error = %e, "chat connection ended with an error");
    }
}

/// GET /api/chat/history?to=&listing=&page=&count=
async fn history_handler(
    Identity(from): Identity,
    Query(params): Query<HistoryParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatMessage>>, ChatError> {
    let key = ConversationKey::new(from.0, params.to, params.listing);
    let count = page_size(params.count, state.history_max_count);
    let messages = state.history.get_history(key, params.page.max(0), count).await?;
    Ok(Json(messages))
}

/// Requested page size, bounded by `max`. An explicit zero asks for an empty page.
fn page_size(count: Option<i64>, max: i64) -> i64 {
    count.unwrap_or(DEFAULT_PAGE_SIZE).clamp(0, max)
}

/// GET /api/chat/dialogs
async fn dialogs_handler(
    Identity(from): Identity,
    State(state): State<AppState>,
) -> Result<Json<Vec<Dialog>>, ChatError> {
    Ok(Json(state.history.list_dialogs(from).await?))
}

/// DELETE /api/chat/dialogs?to=&listing=
async fn clear_handler(
    Identity(from): Identity,
    Query(params): Query<ConversationParams>,
    State(state): State<AppState>,
) -> Result<StatusCode, ChatError> {
    state.dialogs.clear(params.key(from)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let registry = state.registry();
    Json(json!({
        "status": "ok",
        "sessions": registry.session_count(),
        "connections": registry.connection_count(),
    }))
}

// -----------------------------------------------------------------------------
// Frame conversion
// -----------------------------------------------------------------------------

impl From<Message> for Inbound {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Inbound::Frame(Frame::Text(text)),
            Message::Binary(bytes) => Inbound::Frame(Frame::Binary(bytes)),
            Message::Close(_) => Inbound::Close,
            Message::Ping(_) | Message::Pong(_) => Inbound::Control,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}
