//! HTTP surface of the message pipeline.
//!
//! Routes:
//! - `POST /api/message`: send `{ "chat_id", "message" }` as the requester.
//! - `GET /api/message/{chat_id}`: every message of a conversation as the
//!   requester sees it.
//! - `GET /api/message/{chat_id}/latest`: the newest stored record.
//! - `GET /health`: liveness.
//!
//! The requester is read from the [`USER_ID_HEADER`] header, which the
//! authentication layer in front of this service is expected to set.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use qchat::gateway::{EncryptionGateway, HttpOracle, OracleError};
use qchat::keys::KeyCache;
use qchat::negotiate::Bb84Negotiator;
use qchat::pipeline::{FetchError, MessagePipeline, SendError};
use qchat::store::{InMemoryStore, MessageStore};
use qchat_proto::api::{SendMessageRequest, USER_ID_HEADER};
use qchat_proto::message::{ConversationId, FetchedMessage, MessageRecord, UserId};
use qchat_proto::oracle::ErrorBody;

use crate::config::ServerConfig;

/// Pipeline wired with the production oracle and negotiator over store `S`.
pub type ServicePipeline<S = InMemoryStore> = MessagePipeline<HttpOracle, S, Bb84Negotiator>;

/// Shared state for all handlers.
pub struct AppState<S: MessageStore = InMemoryStore> {
    pipeline: ServicePipeline<S>,
}

impl<S: MessageStore> AppState<S> {
    /// Wraps an already assembled pipeline.
    #[must_use]
    pub const fn new(pipeline: ServicePipeline<S>) -> Self {
        Self { pipeline }
    }

    /// Builds the pipeline described by `config` on top of `store`.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Setup`] if the oracle URL is invalid or the
    /// HTTP client cannot be built.
    pub fn with_store(config: &ServerConfig, store: S) -> Result<Self, OracleError> {
        let oracle = HttpOracle::new(&config.oracle_url, config.attempt_timeout)?;
        let pipeline = MessagePipeline::new(
            EncryptionGateway::new(oracle, config.retry_policy()),
            KeyCache::new(Bb84Negotiator::new(config.key_length)),
            store,
        )
        .with_fallback(config.fallback);
        Ok(Self::new(pipeline))
    }

    /// The pipeline behind the handlers.
    #[must_use]
    pub const fn pipeline(&self) -> &ServicePipeline<S> {
        &self.pipeline
    }
}

impl AppState {
    /// Builds the pipeline described by `config` with an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Setup`] if the oracle URL is invalid or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &ServerConfig) -> Result<Self, OracleError> {
        Self::with_store(config, InMemoryStore::new())
    }
}

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The requester header is missing or empty.
    #[error("missing x-user-id header")]
    Unauthorized,

    /// The request body is unusable.
    #[error("{0}")]
    BadRequest(String),

    /// Nothing exists at the requested location.
    #[error("{0}")]
    NotFound(String),

    /// Sending failed.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Fetching failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::Send(SendError::EmptyMessage) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Send(SendError::EncryptionUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Send(SendError::Codec(_) | SendError::Store(_)) | Self::Fetch(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::BadRequest(_) | Self::Send(SendError::EmptyMessage) => "Invalid request",
            Self::NotFound(_) => "Not found",
            Self::Send(SendError::EncryptionUnavailable(_)) => "Encryption unavailable",
            Self::Send(SendError::Codec(_) | SendError::Store(_)) => "Error sending message",
            Self::Fetch(_) => "Error fetching messages",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        let body = ErrorBody {
            error: self.summary().to_string(),
            details: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// Reads the authenticated requester from the request headers.
fn requester(headers: &HeaderMap) -> Result<UserId, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new)
        .ok_or(ApiError::Unauthorized)
}

async fn send_message<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<MessageRecord>, ApiError> {
    let sender = requester(&headers)?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let (Some(chat_id), Some(message)) = (
        body.chat_id.filter(|c| !c.is_empty()),
        body.message.filter(|m| !m.is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "chat_id and message are required".to_string(),
        ));
    };

    let record = state
        .pipeline
        .send(&sender, &ConversationId::new(chat_id), &message)
        .await?;
    Ok(Json(record))
}

async fn fetch_messages<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<FetchedMessage>>, ApiError> {
    let reader = requester(&headers)?;
    let messages = state
        .pipeline
        .fetch(&ConversationId::new(chat_id), &reader)
        .await?;
    Ok(Json(messages))
}

async fn latest_message<S: MessageStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<Json<MessageRecord>, ApiError> {
    requester(&headers)?;
    let conversation = ConversationId::new(chat_id);
    state
        .pipeline
        .latest(&conversation)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no messages in conversation {conversation}")))
}

async fn health() -> &'static str {
    "ok"
}

/// The application router.
pub fn router<S: MessageStore + 'static>(state: Arc<AppState<S>>) -> axum::Router {
    axum::Router::new()
        .route("/api/message", axum::routing::post(send_message::<S>))
        .route("/api/message/{chat_id}", axum::routing::get(fetch_messages::<S>))
        .route(
            "/api/message/{chat_id}/latest",
            axum::routing::get(latest_message::<S>),
        )
        .route("/health", axum::routing::get(health))
        .with_state(state)
}

/// Starts the server on `addr` with the given state.
///
/// Binding `127.0.0.1:0` picks a free port; the bound address is returned
/// together with the [`tokio::task::JoinHandle`] of the serving task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: MessageStore + 'static>(
    addr: &str,
    state: Arc<AppState<S>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "qchat server error");
        }
    });

    Ok((bound_addr, handle))
}
