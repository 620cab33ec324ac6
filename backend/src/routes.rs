use std::time::Duration;

use actix_cors::Cors;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use serde::Deserialize;
use shared::{HealthResponse, ModelMode};

use crate::config::AppConfig;
use crate::error::CaptionError;
use crate::pipeline::{self, CaptionParams, ItemOutcome, UploadedFile};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CaptionQuery {
    method: Option<String>,
    beam_width: Option<String>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/generate-caption").route(web::post().to(generate_caption)))
        .service(web::resource("/batch-generate").route(web::post().to(batch_generate)));
}

pub fn cors(config: &AppConfig) -> Cors {
    let cors = if config.cors_origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        config
            .cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .max_age(3600)
}

async fn index(state: web::Data<AppState>) -> HttpResponse {
    let mode = state.models.mode();
    let description = if mode == ModelMode::Production {
        "Production AI models active"
    } else {
        "Demo models active"
    };
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Image Caption Generator API</title>
    <meta charset="utf-8">
    <style>
        body {{ font-family: Arial, sans-serif; margin: 40px; }}
        .status {{ padding: 15px; border-radius: 8px; margin: 20px 0; }}
        .mock, .fallback {{ background: #4facfe; color: white; }}
        .production {{ background: #43e97b; color: white; }}
    </style>
</head>
<body>
    <h1>Image Caption Generator API</h1>
    <div class="status {mode}">
        <h3>Status: {upper} MODE</h3>
        <p>{description}</p>
    </div>
    <p><a href="/health">Health check</a></p>
</body>
</html>"#,
        mode = mode,
        upper = mode.to_string().to_uppercase(),
        description = description,
    );
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(html)
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        models_loaded: true,
        model_mode: state.models.mode(),
        api_version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn generate_caption(
    state: web::Data<AppState>,
    query: web::Query<CaptionQuery>,
    payload: Multipart,
) -> Result<HttpResponse, CaptionError> {
    let query = query.into_inner();
    let form = read_form(payload, "file", state.config.max_file_size, true).await?;

    let params = CaptionParams {
        method: form.text("method").or(query.method),
        beam_width: form.text("beam_width").or(query.beam_width),
    };
    let upload = form
        .files
        .into_iter()
        .next()
        .ok_or(CaptionError::MissingFile("file"))?;

    let method = pipeline::validate_upload(&state.config, &upload, &params)?;
    log::info!(
        "Captioning {} ({} bytes) with {}",
        upload.filename,
        upload.size,
        method.method()
    );

    let timeout = state.config.request_timeout;
    let worker_state = state.clone();
    let response = run_blocking(timeout, move || {
        pipeline::caption_upload(&worker_state, &upload, method)
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

async fn batch_generate(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, CaptionError> {
    let form = read_form(payload, "files", state.config.max_file_size, false).await?;
    pipeline::check_batch_size(&state.config, form.files.len())?;
    log::info!("Captioning batch of {} files", form.files.len());

    // Each item gets its own timeout so a slow file only fails its own slot.
    let timeout = state.config.request_timeout;
    let mut outcomes = Vec::with_capacity(form.files.len());
    for upload in form.files {
        let worker_state = state.clone();
        let filename = upload.filename.clone();
        let outcome = match run_blocking(timeout, move || pipeline::caption_item(&worker_state, &upload)).await {
            Ok(outcome) => outcome,
            Err(e) => ItemOutcome::failed(&filename, e),
        };
        outcomes.push(outcome);
    }

    Ok(HttpResponse::Ok().json(pipeline::summarize(&state, outcomes)))
}

/// Moves model work onto the blocking pool, bounded by the request timeout.
async fn run_blocking<T, F>(timeout: Duration, work: F) -> Result<T, CaptionError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, web::block(work)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            log::error!("Blocking caption task failed: {}", e);
            Err(CaptionError::Processing(e.to_string()))
        }
        Err(_) => {
            log::error!("Caption request timed out after {:?}", timeout);
            Err(CaptionError::Processing(format!("timed out after {:?}", timeout)))
        }
    }
}

#[derive(Default)]
struct UploadForm {
    files: Vec<UploadedFile>,
    fields: Vec<(String, String)>,
}

impl UploadForm {
    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }
}

/// Collects the file parts named `file_field` and any small text parts.
/// File bodies are kept up to `limit + 1` bytes; the rest is drained and counted.
/// With `single_file`, file parts after the first are drained and dropped.
async fn read_form(
    mut payload: Multipart,
    file_field: &str,
    limit: usize,
    single_file: bool,
) -> Result<UploadForm, CaptionError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| CaptionError::Multipart(e.to_string()))?
    {
        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(String::from),
            ),
            None => (String::new(), None),
        };

        if name == file_field && single_file && !form.files.is_empty() {
            log::debug!("Ignoring extra file part {:?}", filename);
            read_field(&mut field, 0).await?;
        } else if name == file_field {
            let content_type = field.content_type().map(|mime| mime.to_string());
            let (data, size) = read_field(&mut field, limit.saturating_add(1)).await?;
            form.files.push(UploadedFile {
                filename: filename.unwrap_or_default(),
                content_type,
                data,
                size,
            });
        } else if filename.is_none() {
            let (data, _) = read_field(&mut field, 1024).await?;
            form.fields.push((name, String::from_utf8_lossy(&data).trim().to_string()));
        } else {
            log::debug!("Ignoring unexpected multipart file field {:?}", name);
            read_field(&mut field, 0).await?;
        }
    }

    Ok(form)
}

async fn read_field(field: &mut Field, keep: usize) -> Result<(Vec<u8>, usize), CaptionError> {
    let mut data = Vec::new();
    let mut size = 0usize;
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| CaptionError::Multipart(e.to_string()))?
    {
        size += chunk.len();
        let room = keep.saturating_sub(data.len());
        data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok((data, size))
}
