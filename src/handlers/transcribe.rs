//! Submission endpoints.
//!
//! Both entry points share one shape: validate the request, create the job
//! record (visible to status polling from that instant), schedule background
//! execution, return the id. Submission latency is independent of
//! transcription latency - nothing here waits for the engine.

use crate::error::{AppError, AppResult};
use crate::jobs::Submission;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// `POST /transcribe-local` - multipart body with one audio file.
pub async fn transcribe_local(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let audio = read_audio_field(&mut payload).await?;

    let task_id = state.jobs.create();
    info!(
        "Accepted local upload of {} bytes as job {}",
        audio.len(),
        task_id
    );
    state
        .executor
        .submit(task_id.clone(), Submission::Upload(audio));

    Ok(HttpResponse::Ok().json(json!({ "task_id": task_id })))
}

/// `POST /transcribe-remote` - JSON body `{"url": "..."}`.
pub async fn transcribe_remote(
    state: web::Data<AppState>,
    body: web::Json<RemoteRequest>,
) -> AppResult<HttpResponse> {
    let url = body.into_inner().url;
    validate_media_url(&url)?;

    let task_id = state.jobs.create();
    info!("Accepted remote submission of {} as job {}", url, task_id);
    state
        .executor
        .submit(task_id.clone(), Submission::Remote(url));

    Ok(HttpResponse::Ok().json(json!({ "task_id": task_id })))
}

#[derive(Debug, Deserialize)]
pub struct RemoteRequest {
    pub url: String,
}

/// Pull the first non-empty file field out of the multipart body.
async fn read_audio_field(payload: &mut Multipart) -> AppResult<Vec<u8>> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read uploaded file: {}", e)))?
        {
            data.extend_from_slice(&chunk);
        }

        if !data.is_empty() {
            return Ok(data);
        }
    }

    Err(AppError::BadRequest(
        "multipart body must contain one non-empty audio file".to_string(),
    ))
}

/// Reject URLs before a job id is issued; retrieval failures after this
/// point become a `failed` job instead.
fn validate_media_url(url: &str) -> AppResult<()> {
    if url.trim().is_empty() {
        return Err(AppError::BadRequest("url must not be empty".to_string()));
    }

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::BadRequest(format!(
            "url must use http or https, got '{}'",
            url
        )));
    }

    Ok(())
}
