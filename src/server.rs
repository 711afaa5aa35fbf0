//! HTTP server.
//!
//! Exposes capture sessions, frame intake, the live event stream, review
//! and the inventory as a JSON API under `/api`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/stream/start` | Start a capture session |
//! | `GET`  | `/api/stream` | List sessions, newest first |
//! | `GET`  | `/api/stream/{id}` | One session with counters |
//! | `GET`  | `/api/stream/{id}/assets` | Stored frames of a session |
//! | `POST` | `/api/stream/ingest?session_id&seq&type&ts` | Upload one frame (multipart `file`) |
//! | `GET`  | `/api/stream/{id}/events` | Live detection events (SSE) |
//! | `POST` | `/api/stream/stop?session_id` | Stop a session |
//! | `GET`, `POST` | `/api/items` | List (`?zone&category`) or create items |
//! | `GET`, `PUT`, `DELETE` | `/api/items/{id}` | Read, replace or delete an item |
//! | `GET`  | `/api/items/{id}/detections` | Detections resolved into an item |
//! | `GET`, `POST` | `/api/zones` | List or create zones |
//! | `GET`, `POST` | `/api/categories` | List or create categories |
//! | `GET`  | `/api/review/{session}` | Current proposals |
//! | `POST` | `/api/review/{session}/accept` | Accept a proposal as a new item |
//! | `POST` | `/api/review/{session}/reject` | Discard a proposal |
//! | `POST` | `/api/review/{session}/merge` | Attach a proposal to an existing item |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "session not found: 3f2a..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `invalid_state` (409),
//! `conflict` (409), `internal` (500).
//!
//! # Event stream
//!
//! Each SSE event is named after its kind (`detections`, `stopped`) and
//! carries its log offset as the event id, so a reconnecting client that
//! sends `Last-Event-ID` resumes after the last event it saw. An idle
//! stream emits a `keepalive` event; the stream ends after `stopped`.

use axum::{
    extract::{
        multipart::Multipart,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db;
use crate::detector::{build_detector, Detector};
use crate::error::InventoryError;
use crate::events::{EventHub, SessionEvent};
use crate::ingest::{ingest_frame, FrameUpload, IngestContext, IngestReceipt};
use crate::items::{self, ItemFields, ItemFilter};
use crate::migrate;
use crate::models::{
    AssetKind, Category, Detection, ImageAsset, Item, SessionState, StreamSession, Zone,
};
use crate::review::{self, AcceptRequest, MergeRequest, Proposal, RejectRequest, Resolution};
use crate::sessions;
use crate::taxonomy::{self, CategoryRequest, ZoneRequest};

/// Events pulled from the hub per poll of one SSE stream.
const SSE_READ_BATCH: usize = 64;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub detector: Arc<dyn Detector>,
    pub events: Arc<EventHub>,
}

impl AppState {
    /// State with the detector and event hub described by `config`.
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let detector = build_detector(&config.detector);
        let events = Arc::new(EventHub::with_retention(
            config.stream.queue_capacity,
            Duration::from_secs(config.stream.closed_retention_secs),
        ));
        Self {
            config: Arc::new(config),
            pool,
            detector,
            events,
        }
    }
}

/// Starts the HTTP server.
///
/// Applies the schema, then binds to `[server].bind` and serves until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), pool);
    tracing::info!(
        detector = state.detector.name(),
        queue_capacity = state.events.capacity(),
        "server state ready"
    );
    let app = build_router(state);

    println!("Garage inventory listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the full router over `state`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/api/stream/start", post(handle_stream_start))
        .route("/api/stream", get(handle_list_sessions))
        .route("/api/stream/ingest", post(handle_ingest))
        .route("/api/stream/stop", post(handle_stream_stop))
        .route("/api/stream/{id}", get(handle_get_session))
        .route("/api/stream/{id}/assets", get(handle_session_assets))
        .route("/api/stream/{id}/events", get(handle_events))
        .route("/api/items", get(handle_list_items).post(handle_create_item))
        .route(
            "/api/items/{id}",
            get(handle_get_item)
                .put(handle_update_item)
                .delete(handle_delete_item),
        )
        .route("/api/items/{id}/detections", get(handle_item_detections))
        .route("/api/zones", get(handle_list_zones).post(handle_create_zone))
        .route(
            "/api/categories",
            get(handle_list_categories).post(handle_create_category),
        )
        .route("/api/review/{session}", get(handle_list_proposals))
        .route("/api/review/{session}/accept", post(handle_accept))
        .route("/api/review/{session}/reject", post(handle_reject))
        .route("/api/review/{session}/merge", post(handle_merge))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match &err {
            e if e.is_not_found() => error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
            InventoryError::Validation(_) => bad_request(err.to_string()),
            InventoryError::InvalidState(_) => {
                error(StatusCode::CONFLICT, "invalid_state", err.to_string())
            }
            InventoryError::Conflict(_) => error(StatusCode::CONFLICT, "conflict", err.to_string()),
            _ => {
                tracing::error!(error = %err, "request failed");
                error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    err.to_string(),
                )
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Capture sessions ============

#[derive(Serialize)]
struct StartResponse {
    session_id: String,
    session: StreamSession,
}

async fn handle_stream_start(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let session = sessions::start_session(&state.pool).await?;
    state.events.open(&session.id);
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            session_id: session.id.clone(),
            session,
        }),
    ))
}

async fn handle_list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<StreamSession>>> {
    Ok(Json(sessions::list_sessions(&state.pool).await?))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamSession>> {
    Ok(Json(sessions::get_session(&state.pool, &id).await?))
}

async fn handle_session_assets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ImageAsset>>> {
    Ok(Json(sessions::session_assets(&state.pool, &id).await?))
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: String,
}

#[derive(Serialize)]
struct StopResponse {
    ok: bool,
    session: StreamSession,
}

async fn handle_stream_stop(
    State(state): State<AppState>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> ApiResult<Json<StopResponse>> {
    let Query(query) = query?;
    let session = sessions::stop_session(&state.pool, &query.session_id).await?;
    close_event_log(&state.events, &session);
    Ok(Json(StopResponse { ok: true, session }))
}

fn close_event_log(events: &EventHub, session: &StreamSession) {
    events.close(
        &session.id,
        SessionEvent::Stopped {
            frames_processed: session.frames_processed,
            detections_count: session.detections_count,
        },
    );
}

// ============ POST /api/stream/ingest ============

#[derive(Deserialize)]
struct IngestQuery {
    session_id: String,
    seq: i64,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    ts: Option<f64>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    query: Result<Query<IngestQuery>, QueryRejection>,
    mut multipart: Multipart,
) -> ApiResult<Json<IngestReceipt>> {
    let Query(query) = query?;

    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("frame.bin").to_string();
        let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
        file = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = file.ok_or_else(|| bad_request("multipart field 'file' is required"))?;
    let kind = match query.kind.as_deref() {
        Some(k) => k.parse::<AssetKind>()?,
        None => AssetKind::default(),
    };

    let ctx = IngestContext {
        pool: &state.pool,
        storage: &state.config.storage,
        detector: state.detector.as_ref(),
        events: &state.events,
    };
    let receipt = ingest_frame(
        &ctx,
        FrameUpload {
            session_id: query.session_id,
            seq: query.seq,
            kind,
            filename,
            bytes: bytes.to_vec(),
            frame_ts: query.ts,
        },
    )
    .await?;

    Ok(Json(receipt))
}

// ============ GET /api/stream/{id}/events ============

struct EventCursor {
    events: Arc<EventHub>,
    session_id: String,
    cursor: u64,
    pending: VecDeque<Event>,
    poll: Duration,
    keepalive: Duration,
    idle_since: Instant,
    finished: bool,
}

impl EventCursor {
    async fn next(mut self) -> Option<(Result<Event, Infallible>, Self)> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some((Ok(event), self));
            }
            if self.finished {
                return None;
            }

            let batch = self.events.read(&self.session_id, self.cursor, SSE_READ_BATCH);
            if batch.skipped > 0 {
                tracing::warn!(
                    session_id = %self.session_id,
                    skipped = batch.skipped,
                    "event stream reader fell behind"
                );
            }
            self.cursor = batch.next_cursor;
            self.finished = batch.finished;
            if batch.events.is_empty()
                && !batch.finished
                && !self.events.contains(&self.session_id)
            {
                tracing::debug!(session_id = %self.session_id, "session log dropped, ending stream");
                return None;
            }

            for envelope in batch.events {
                match Event::default()
                    .event(envelope.event.kind())
                    .id(envelope.offset.to_string())
                    .json_data(&envelope.event)
                {
                    Ok(event) => self.pending.push_back(event),
                    Err(e) => tracing::error!(error = %e, "failed to encode session event"),
                }
            }

            if !self.pending.is_empty() {
                self.idle_since = Instant::now();
                continue;
            }
            if self.finished {
                return None;
            }
            if self.idle_since.elapsed() >= self.keepalive {
                self.idle_since = Instant::now();
                let keepalive = Event::default().event("keepalive").data("{}");
                return Some((Ok(keepalive), self));
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

/// Cursor to resume from, taken from `Last-Event-ID`.
fn resume_cursor(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}

async fn handle_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = sessions::get_session(&state.pool, &id).await?;
    if session.state == SessionState::Stopped {
        // Logs do not survive a restart; a stopped session still ends with `stopped`
        close_event_log(&state.events, &session);
    } else {
        state.events.open(&session.id);
    }

    let cursor = EventCursor {
        events: state.events.clone(),
        session_id: session.id,
        cursor: resume_cursor(&headers),
        pending: VecDeque::new(),
        poll: Duration::from_millis(state.config.stream.poll_interval_ms),
        keepalive: Duration::from_millis(state.config.stream.keepalive_ms),
        idle_since: Instant::now(),
        finished: false,
    };
    tracing::debug!(session_id = %cursor.session_id, cursor = cursor.cursor, "event stream opened");

    Ok(Sse::new(stream::unfold(cursor, EventCursor::next)))
}

// ============ Items ============

async fn handle_list_items(
    State(state): State<AppState>,
    filter: Result<Query<ItemFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<Item>>> {
    let Query(filter) = filter?;
    Ok(Json(items::list_items(&state.pool, &filter).await?))
}

async fn handle_create_item(
    State(state): State<AppState>,
    body: Result<Json<ItemFields>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Item>)> {
    let Json(fields) = body?;
    let item = items::create_item(&state.pool, fields).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn handle_get_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Item>> {
    Ok(Json(items::get_item(&state.pool, id).await?))
}

async fn handle_update_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<ItemFields>, JsonRejection>,
) -> ApiResult<Json<Item>> {
    let Json(fields) = body?;
    Ok(Json(items::update_item(&state.pool, id, fields).await?))
}

async fn handle_delete_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let detached = items::delete_item(&state.pool, id).await?;
    Ok(Json(json!({ "ok": true, "detached": detached })))
}

async fn handle_item_detections(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Detection>>> {
    Ok(Json(items::item_detections(&state.pool, id).await?))
}

// ============ Zones and categories ============

async fn handle_list_zones(State(state): State<AppState>) -> ApiResult<Json<Vec<Zone>>> {
    Ok(Json(taxonomy::list_zones(&state.pool).await?))
}

async fn handle_create_zone(
    State(state): State<AppState>,
    body: Result<Json<ZoneRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Zone>)> {
    let Json(req) = body?;
    let zone = taxonomy::create_zone(&state.pool, req).await?;
    Ok((StatusCode::CREATED, Json(zone)))
}

async fn handle_list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(taxonomy::list_categories(&state.pool).await?))
}

async fn handle_create_category(
    State(state): State<AppState>,
    body: Result<Json<CategoryRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    let Json(req) = body?;
    let category = taxonomy::create_category(&state.pool, req).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

// ============ Review ============

#[derive(Serialize)]
struct ProposalsResponse {
    session_id: String,
    proposals: Vec<Proposal>,
}

async fn handle_list_proposals(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<Json<ProposalsResponse>> {
    let proposals = review::list_proposals(&state.pool, &session).await?;
    Ok(Json(ProposalsResponse {
        session_id: session,
        proposals,
    }))
}

async fn handle_accept(
    State(state): State<AppState>,
    Path(session): Path<String>,
    body: Result<Json<AcceptRequest>, JsonRejection>,
) -> ApiResult<Json<Resolution>> {
    let Json(req) = body?;
    let resolution = review::accept(&state.pool, &session, &req.temp_id, req.fields).await?;
    Ok(Json(resolution))
}

async fn handle_reject(
    State(state): State<AppState>,
    Path(session): Path<String>,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = body?;
    let deleted = review::reject(&state.pool, &session, &req.temp_id).await?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

async fn handle_merge(
    State(state): State<AppState>,
    Path(session): Path<String>,
    body: Result<Json<MergeRequest>, JsonRejection>,
) -> ApiResult<Json<Resolution>> {
    let Json(req) = body?;
    let resolution =
        review::merge(&state.pool, &session, &req.temp_id, req.target_item_id).await?;
    Ok(Json(resolution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_resume_cursor() {
        let mut headers = HeaderMap::new();
        assert_eq!(resume_cursor(&headers), 0);
        headers.insert("last-event-id", HeaderValue::from_static("4"));
        assert_eq!(resume_cursor(&headers), 5);
        headers.insert("last-event-id", HeaderValue::from_static("junk"));
        assert_eq!(resume_cursor(&headers), 0);
    }

    #[test]
    fn test_error_mapping() {
        let e: AppError = InventoryError::SessionNotFound("s".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, "not_found");

        let e: AppError = InventoryError::Validation("bad".into()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e: AppError = InventoryError::InvalidState("stopped".into()).into();
        assert_eq!(e.status, StatusCode::CONFLICT);
        assert_eq!(e.code, "invalid_state");

        let e: AppError = InventoryError::Conflict("dup".into()).into();
        assert_eq!(e.code, "conflict");

        let e: AppError = InventoryError::Detector("boom".into()).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "internal");
    }
}
