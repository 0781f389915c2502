//! HTTP surface: book details, health and metrics.
//!
//! Book endpoints answer with the envelope the library frontend expects:
//! `{"msg", "code", "data", "success"}` with HTTP 200 and an application code.

use crate::error::FolioError;
use crate::lookup::{BookLookup, LookupOutcome};
use crate::metrics::SharedMetrics;
use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub const CODE_SUCCESS: u16 = 101;
pub const CODE_MISSING_PARAM: u16 = 201;
pub const CODE_LOOKUP_FAILED: u16 = 301;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub lookup: BookLookup,
    pub metrics: SharedMetrics,
}

/// Response envelope
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub msg: String,
    pub code: u16,
    pub data: Value,
    pub success: bool,
}

impl ApiResponse {
    pub fn success(msg: &str, data: Value) -> Self {
        Self {
            msg: msg.to_string(),
            code: CODE_SUCCESS,
            data,
            success: true,
        }
    }

    pub fn error(msg: &str, code: u16) -> Self {
        Self {
            msg: msg.to_string(),
            code,
            data: Value::Object(Default::default()),
            success: false,
        }
    }

    /// Map a lookup result onto the envelope.
    pub fn from_lookup(outcome: LookupOutcome) -> Self {
        match outcome {
            Ok(details) => match serde_json::to_value(details.as_ref()) {
                Ok(data) => Self::success("Book details retrieved", data),
                Err(e) => Self::error(&e.to_string(), CODE_LOOKUP_FAILED),
            },
            Err(FolioError::InvalidInput(msg)) => Self::error(&msg, CODE_MISSING_PARAM),
            Err(e) if e.is_busy() => Self::error("Server busy, please try again later", CODE_LOOKUP_FAILED),
            Err(e) => Self::error(&e.to_string(), CODE_LOOKUP_FAILED),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct DetailsQuery {
    pub isbn: Option<String>,
}

/// `GET /book/details?isbn=...`
pub async fn book_details(
    State(state): State<AppState>,
    Query(query): Query<DetailsQuery>,
) -> Json<ApiResponse> {
    let isbn = query.isbn.unwrap_or_default();
    if isbn.trim().is_empty() {
        return Json(ApiResponse::error("isbn must not be empty", CODE_MISSING_PARAM));
    }
    Json(ApiResponse::from_lookup(state.lookup.lookup(&isbn).await))
}

/// Prometheus metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.update_queue_metrics(state.lookup.queue());
    let output = state.metrics.render();

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}

/// Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.lookup.queue();
    let status = if queue.len() < queue.capacity() {
        "healthy"
    } else {
        "saturated"
    };

    let body = serde_json::json!({
        "status": status,
        "queue_depth": queue.len(),
        "queue_capacity": queue.capacity(),
        "in_flight": queue.in_flight(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Build the application router. Cover images are served from `image_dir`.
pub fn router(state: AppState, image_dir: &Path) -> Router {
    Router::new()
        .route("/book/details", get(book_details))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .nest_service("/images/books", ServeDir::new(image_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
