//! HTTP surface: single-image and batch prediction plus a health check.
//!
//! Uploads are either `multipart/form-data` or the raw image bytes as the
//! request body. Inference runs on the blocking thread pool.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::analytics::{BatchReport, ImageReport};
use crate::color_utils::symbols;
use crate::config::ServerConfig;
use crate::image_input::PredictError;
use crate::pipeline::ModelContext;

type AppState = Arc<ModelContext>;

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        match self {
            PredictError::InvalidImage => {
                (StatusCode::OK, Json(json!({ "error": "Invalid Image" }))).into_response()
            }
            PredictError::Inference(e) => {
                log::error!("{}Inference failed: {e:#}", symbols::operation_failed());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Inference failed", "detail": format!("{e:#}") })),
                )
                    .into_response()
            }
        }
    }
}

struct Upload {
    filename: String,
    bytes: Bytes,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Every uploaded file of a request, in order. A non-multipart body is a
/// single upload.
async fn read_uploads(request: Request) -> Result<Vec<Upload>, Response> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        let bytes = Bytes::from_request(request, &())
            .await
            .map_err(IntoResponse::into_response)?;
        return Ok(vec![Upload {
            filename: "upload".to_string(),
            bytes,
        }]);
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(IntoResponse::into_response)?;

    let mut uploads = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err((e.status(), e.body_text()).into_response()),
        };
        let filename = match (field.file_name(), field.name()) {
            (Some(file_name), _) => file_name.to_string(),
            (None, Some(name @ ("file" | "files" | "images"))) => name.to_string(),
            _ => continue,
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (e.status(), e.body_text()).into_response())?;
        uploads.push(Upload { filename, bytes });
    }
    Ok(uploads)
}

async fn run_blocking<T, F>(task: F) -> Result<T, PredictError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PredictError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| PredictError::Inference(anyhow!("Inference task failed: {e}")))?
}

async fn predict(State(ctx): State<AppState>, request: Request) -> Response {
    let uploads = match read_uploads(request).await {
        Ok(uploads) => uploads,
        Err(response) => return response,
    };
    let Some(upload) = uploads.into_iter().next() else {
        return PredictError::InvalidImage.into_response();
    };
    log::debug!(
        "POST /predict: {} ({} bytes)",
        upload.filename,
        upload.bytes.len()
    );

    match run_blocking(move || ctx.predict_bytes(&upload.bytes)).await {
        Ok((_, response)) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn predict_batch(State(ctx): State<AppState>, request: Request) -> Response {
    let uploads = match read_uploads(request).await {
        Ok(uploads) => uploads,
        Err(response) => return response,
    };
    if uploads.is_empty() {
        return bad_request("No images uploaded");
    }
    log::info!("POST /predict/batch: {} image(s)", uploads.len());

    let task = move || {
        let mut images = Vec::with_capacity(uploads.len());
        for (index, upload) in uploads.into_iter().enumerate() {
            let report = match ctx.predict_bytes(&upload.bytes) {
                Ok((dimensions, response)) => {
                    ImageReport::processed(index, upload.filename, dimensions, response)
                }
                Err(PredictError::InvalidImage) => {
                    log::warn!("{}{} is not a valid image", symbols::warning(), upload.filename);
                    ImageReport::failed(index, upload.filename, "Invalid Image")
                }
                Err(e) => return Err(e),
            };
            images.push(report);
        }
        Ok(BatchReport::new(images))
    };

    match run_blocking(task).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health(State(ctx): State<AppState>) -> Json<serde_json::Value> {
    let brand_model = if ctx.brand_available() {
        "loaded"
    } else {
        "unavailable"
    };
    Json(json!({
        "status": "ok",
        "brand_model": brand_model,
        "target_class_id": ctx.target_class_id(),
    }))
}

pub fn build_router(ctx: Arc<ModelContext>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict/batch", post(predict_batch))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(ctx)
}

/// Serve on an already-bound listener until the task is dropped
pub async fn serve_with_listener(
    listener: TcpListener,
    ctx: Arc<ModelContext>,
    max_upload_bytes: usize,
) -> Result<()> {
    let app = build_router(ctx, max_upload_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

/// Bind and serve until Ctrl-C
pub async fn run_server(config: &ServerConfig, ctx: Arc<ModelContext>) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    let local_addr = listener.local_addr()?;
    log::info!(
        "{}Listening on http://{local_addr} (max upload {} MiB)",
        symbols::server_listening(),
        config.max_upload_bytes / (1024 * 1024)
    );
    serve_with_listener(listener, ctx, config.max_upload_bytes).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to install Ctrl-C handler: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
