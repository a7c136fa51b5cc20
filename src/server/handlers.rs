use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use tracing::info;

use super::models::{ErrorResponse, TranslateRequest};
use super::state::ServerState;
use crate::codec;
use crate::error::PipelineError;
use crate::ocr::OcrBackend;
use crate::pipeline::{DefaultPipeline, Pipeline, PipelineResult};
use crate::providers::TranslationProvider;
use crate::settings::Settings;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server(settings: Settings, addr: String) -> Result<()> {
    let pipeline = DefaultPipeline::from_settings(&settings)?;
    let app = router(Arc::new(pipeline));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router<B, P>(pipeline: Arc<Pipeline<B, P>>) -> Router
where
    B: OcrBackend + 'static,
    P: TranslationProvider + 'static,
{
    let state = ServerState { pipeline };
    Router::new()
        .route("/health", get(health))
        .route("/translate", post(translate::<B, P>))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn translate<B, P>(
    State(state): State<ServerState<B, P>>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<PipelineResult>, ApiError>
where
    B: OcrBackend + 'static,
    P: TranslationProvider + 'static,
{
    let Json(payload) = payload.map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid request body".to_string(),
                details: Some(rejection.body_text()),
            }),
        )
    })?;
    let bytes = decode_image_data(&payload.image_data).map_err(|message| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid image data".to_string(),
                details: Some(message),
            }),
        )
    })?;
    state
        .pipeline
        .translate_slide(&bytes)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Accepts plain base64 or a `data:<mime>;base64,` URI.
fn decode_image_data(raw: &str) -> Result<Vec<u8>, String> {
    let raw = raw.trim();
    let encoded = match raw.strip_prefix("data:") {
        Some(uri) => {
            let (header, data) = uri
                .split_once(',')
                .ok_or_else(|| "malformed data URI".to_string())?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| "data URI must be base64 encoded".to_string())?;
            if !mime.is_empty() && codec::image_format_from_mime(mime).is_none() {
                return Err(format!("unsupported image type '{}'", mime));
            }
            data
        }
        None => raw,
    };
    if encoded.is_empty() {
        return Err("imageData is empty".to_string());
    }
    BASE64
        .decode(encoded)
        .map_err(|err| format!("invalid base64: {}", err))
}

fn error_response(err: PipelineError) -> ApiError {
    let (status, error, details) = match &err {
        PipelineError::ImageDecode(message) => (
            StatusCode::BAD_REQUEST,
            "invalid image",
            Some(message.clone()),
        ),
        PipelineError::OcrBackendUnavailable { .. } => (
            StatusCode::BAD_GATEWAY,
            "OCR unavailable",
            Some(err.to_string()),
        ),
        PipelineError::Configuration(_) | PipelineError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "slide translation failed",
            None,
        ),
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            details,
        }),
    )
}
