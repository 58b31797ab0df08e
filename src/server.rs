//! HTTP API for indexing chat exports and asking questions about them.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/api/v1/ping` | Liveness check, `{"ping": "pong"}` |
//! | `GET`  | `/health` | Vector store readiness (200 or 503) |
//! | `POST` | `/index-data/` | Multipart upload (`file`) of a CSV or Parquet export |
//! | `POST` | `/query/` | `{"query": "...", "top_k": 3}` → answer + retrieved contexts |
//! | `POST` | `/clear-index/` | Drop every indexed thread |
//!
//! Each path is also served without the trailing slash.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `payload_too_large` (413),
//! `service_unavailable` (503), `bad_gateway` (502), `internal` (500).

use axum::{
    extract::{
        multipart::{Multipart, MultipartError},
        rejection::JsonRejection,
        DefaultBodyLimit, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chat_rag_core::store::VectorStore;
use chat_rag_core::thread::{prepare_documents, ExtractError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::loader::{self, FileKind, LoadError};
use crate::pipeline::{self, Answer, BatchSizes, IndexReport, QueryOptions, Services};

const STORE_UNAVAILABLE: &str = "Weaviate client not available";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    services: Services,
}

impl AppState {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config: Arc::new(config),
            services,
        }
    }

    fn store(&self) -> Result<&dyn VectorStore, AppError> {
        self.services
            .store
            .as_deref()
            .ok_or_else(|| service_unavailable(STORE_UNAVAILABLE))
    }
}

/// Builds the router with CORS, request tracing, and the upload size limit.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.server.max_upload_mb.saturating_mul(1024 * 1024);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/api/v1/ping", get(handle_ping))
        .route("/health", get(handle_health))
        .route("/index-data/", post(handle_index_data))
        .route("/index-data", post(handle_index_data))
        .route("/query/", post(handle_query))
        .route("/query", post(handle_query))
        .route("/clear-index/", post(handle_clear_index))
        .route("/clear-index", post(handle_clear_index))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connects providers and serves until Ctrl-C.
///
/// A vector store that is not ready at startup does not stop the server;
/// store-dependent endpoints answer 503 instead.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::connect(config).await?;
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), services));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "chat-rag server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn service_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "service_unavailable".to_string(),
        message: message.into(),
    }
}

/// An upstream provider (embeddings, vector store) failed.
fn bad_gateway(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    tracing::error!(error = %message, "upstream failure");
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "bad_gateway".to_string(),
        message,
    }
}

fn payload_too_large(max_upload_mb: usize) -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large".to_string(),
        message: format!(
            "upload exceeds the {} MB limit (server.max_upload_mb)",
            max_upload_mb
        ),
    }
}

/// Body limit overruns surface as multipart errors with status 413.
fn multipart_error(err: MultipartError, state: &AppState) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        payload_too_large(state.config.server.max_upload_mb)
    } else {
        bad_request(err.body_text())
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET / and GET /api/v1/ping ============

#[derive(Serialize)]
struct RootResponse {
    message: String,
    version: String,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Chat RAG API is running. POST /index-data/ to upload, POST /query/ to ask."
            .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ping": "pong" }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"` or `"unavailable"`.
    status: String,
    vector_store: String,
    version: String,
}

/// Probes the vector store on every call; 503 when it is missing or not ready.
async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (ready, name) = match state.services.store.as_deref() {
        Some(store) => (store.is_ready().await, store.name().to_string()),
        None => (false, state.config.vector_store.backend.clone()),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "unavailable" }.to_string(),
            vector_store: name,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

// ============ POST /index-data/ ============

#[derive(Serialize)]
struct IndexResponse {
    message: String,
    file_name: String,
    #[serde(flatten)]
    report: IndexReport,
}

/// Loads the uploaded table, extracts one document per thread, and indexes them.
///
/// Returns `400` for unsupported or unreadable files and for a missing
/// messages column, `413` above `server.max_upload_mb`, `503` when the
/// store is unavailable, and `502` when the embedding provider or store fails.
async fn handle_index_data(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IndexResponse>, AppError> {
    let store = state.store()?;

    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, &state))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, &state))?;
        upload = Some((file_name, data));
        break;
    }
    let (file_name, data) =
        upload.ok_or_else(|| bad_request("multipart field 'file' is required"))?;

    let kind = FileKind::from_file_name(&file_name).map_err(|e| bad_request(e.to_string()))?;
    tracing::info!(file = %file_name, bytes = data.len(), "received upload");

    let options = state.config.ingest.extract_options();
    let (rows, documents) = tokio::task::spawn_blocking(move || {
        let table = loader::load_table(kind, data)?;
        let documents = prepare_documents(&table, &options)?;
        Ok::<_, UploadError>((table.len(), documents))
    })
    .await
    .map_err(|e| internal(format!("upload processing task failed: {}", e)))?
    .map_err(|e| bad_request(e.to_string()))?;

    let sizes = BatchSizes {
        embedding: state.config.embedding.batch_size,
        store: state.config.vector_store.batch_size,
    };
    let mut report =
        pipeline::index_documents(store, state.services.embedder.as_ref(), &documents, sizes)
            .await
            .map_err(bad_gateway)?;
    report.rows = rows;

    tracing::info!(
        file = %file_name,
        documents = report.documents,
        indexed = report.indexed,
        failed = report.failed,
        "upload indexed"
    );

    Ok(Json(IndexResponse {
        message: format!(
            "Successfully processed {} documents from {}. Indexed {}, failed {}.",
            report.documents, file_name, report.indexed, report.failed
        ),
        file_name,
        report,
    }))
}

/// Client-side problems with an uploaded file.
#[derive(Debug, thiserror::Error)]
enum UploadError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

// ============ POST /query/ ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

/// Retrieves the nearest threads and answers from them.
///
/// Returns `400` for an empty query or out-of-range `top_k`, `503` when the
/// store is unavailable, and `502` when embedding or search fails.
async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    let store = state.store()?;
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;

    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let retrieval = &state.config.retrieval;
    let top_k = request.top_k.unwrap_or(retrieval.default_top_k);
    if top_k == 0 || top_k > retrieval.max_top_k {
        return Err(bad_request(format!(
            "top_k must be between 1 and {}",
            retrieval.max_top_k
        )));
    }

    let options = QueryOptions {
        top_k,
        preview_chars: retrieval.preview_chars,
        reply_language: &state.config.completion.reply_language,
    };
    let answer = pipeline::ask(&state.services, store, &request.query, options)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(answer))
}

// ============ POST /clear-index/ ============

async fn handle_clear_index(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = state.store()?;
    pipeline::clear_index(store).await.map_err(bad_gateway)?;
    Ok(Json(serde_json::json!({
        "message": format!(
            "Successfully cleared all data from class '{}'.",
            state.config.vector_store.class_name
        )
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::DisabledChatModel;
    use crate::embedding::DisabledEmbedder;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chat_rag_core::store::memory::InMemoryStore;
    use tower::ServiceExt;

    const BOUNDARY: &str = "chat-rag-boundary";

    fn app(max_upload_mb: usize) -> Router {
        let mut config = Config::default();
        config.server.max_upload_mb = max_upload_mb;
        let services = Services {
            embedder: Arc::new(DisabledEmbedder),
            chat: Arc::new(DisabledChatModel),
            store: Some(Arc::new(InMemoryStore::new()) as Arc<dyn VectorStore>),
        };
        router(AppState::new(config, services))
    }

    fn upload_request(payload: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"big.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/index-data/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let mut payload = b"messages_json\n".to_vec();
        payload.resize(2 * 1024 * 1024, b'a');

        let response = app(1).oneshot(upload_request(&payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "payload_too_large");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("server.max_upload_mb"));
    }

    #[tokio::test]
    async fn test_small_upload_passes_body_limit() {
        let response = app(1)
            .oneshot(upload_request(b"messages_json\n\"[]\"\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
