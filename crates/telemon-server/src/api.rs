//! HTTP handlers. Bodies are plain text except for the JSON endpoints, and
//! every error is a short lowercase message with its status code.

use crate::ingest::IngestError;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use telemon_common::types::StructuredMetric;

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::NotFound => StatusCode::NOT_FOUND,
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::Forbidden => StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}

/// JSON body that failed to decode.
#[derive(Debug)]
pub struct InvalidJson;

impl IntoResponse for InvalidJson {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, "invalid json").into_response()
    }
}

/// Decodes the (already unwrapped) request body. `axum::Json` is not used as
/// an extractor because it insists on a JSON content type and words its own
/// rejections.
fn decode_json<T: DeserializeOwned>(trace_id: &str, body: &Bytes) -> Result<T, InvalidJson> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(trace_id = %trace_id, error = %e, "Rejected malformed JSON body");
        InvalidJson
    })
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/update", post(update_json))
        .route("/update/", post(update_json))
        .route("/updates", post(updates))
        .route("/updates/", post(updates))
        .route("/value/:kind/:name", get(value_path))
        .route("/value", post(value_json))
        .route("/value/", post(value_json))
}

async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, IngestError> {
    state.ingest.update_path(&kind, &name, &value)?;
    Ok(StatusCode::OK)
}

async fn update_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let metric: StructuredMetric = match decode_json(&trace_id, &body) {
        Ok(metric) => metric,
        Err(e) => return e.into_response(),
    };
    match state.ingest.update_one(&metric) {
        Ok(echo) => Json(echo).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn updates(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let metrics: Vec<StructuredMetric> = match decode_json(&trace_id, &body) {
        Ok(metrics) => metrics,
        Err(e) => return e.into_response(),
    };
    match state.ingest.update_batch(&metrics) {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, IngestError> {
    let record = state.ingest.value(&kind, &name)?;
    Ok(record.value.render())
}

async fn value_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let query: StructuredMetric = match decode_json(&trace_id, &body) {
        Ok(query) => query,
        Err(e) => return e.into_response(),
    };
    match state.ingest.value_of(&query) {
        Ok(metric) => Json(metric).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, IngestError> {
    let mut records = state.ingest.all()?;
    records.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.kind().as_str().cmp(b.kind().as_str()))
    });

    let rows = records
        .iter()
        .map(|r| {
            format!(
                "<li>{}={}</li>",
                escape_html(&r.name),
                escape_html(&r.value.render())
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(Html(
        include_str!("templates/index.html").replace("{{rows}}", &rows),
    ))
}

async fn ping(State(state): State<AppState>) -> Result<StatusCode, IngestError> {
    state.ingest.ping()?;
    Ok(StatusCode::OK)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
