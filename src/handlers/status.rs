//! Status endpoint.
//!
//! Read-only, idempotent view over the job store. Clients poll this until
//! they observe a terminal status; terminal records never change, so
//! repeated reads always return the same answer.

use crate::error::{AppError, AppResult};
use crate::jobs::{JobRecord, JobStatus};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;

/// Body of a successful status lookup. `result` appears exactly on
/// completed jobs, `error` exactly on failed ones.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: JobStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobRecord> for StatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            status: record.status,
            result: record.result,
            error: record.error,
        }
    }
}

/// `GET /status/{task_id}`.
pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let task_id = path.into_inner();

    let record = state
        .jobs
        .get(&task_id)
        .ok_or_else(|| AppError::NotFound(format!("no job with id {}", task_id)))?;

    Ok(HttpResponse::Ok().json(StatusResponse::from(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::jobs::JobOutcome;
    use actix_web::{test, App};

    fn service_state() -> AppState {
        AppState::new(AppConfig::default()).unwrap()
    }

    #[::core::prelude::v1::test]
    fn test_processing_response_has_no_result_or_error_keys() {
        let state = service_state();
        let id = state.jobs.create();

        let response = StatusResponse::from(state.jobs.get(&id).unwrap());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "processing");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[::core::prelude::v1::test]
    fn test_completed_response_carries_the_text() {
        let state = service_state();
        let id = state.jobs.create();
        state
            .jobs
            .update(&id, JobOutcome::Completed("hello there".into()))
            .unwrap();

        let json =
            serde_json::to_value(StatusResponse::from(state.jobs.get(&id).unwrap())).unwrap();

        assert_eq!(json["status"], "completed");
        assert_eq!(json["result"], "hello there");
        assert!(json.get("error").is_none());
    }

    #[::core::prelude::v1::test]
    fn test_failed_response_carries_the_message() {
        let state = service_state();
        let id = state.jobs.create();
        state
            .jobs
            .update(&id, JobOutcome::Failed("decode went wrong".into()))
            .unwrap();

        let json =
            serde_json::to_value(StatusResponse::from(state.jobs.get(&id).unwrap())).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "decode went wrong");
        assert!(json.get("result").is_none());
    }

    #[actix_web::test]
    async fn test_unknown_id_is_a_404() {
        let state = service_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/status/{task_id}", web::get().to(job_status)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/status/never-issued-id")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_found");
    }

    #[actix_web::test]
    async fn test_known_id_is_queryable_over_http() {
        let state = service_state();
        let id = state.jobs.create();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/status/{task_id}", web::get().to(job_status)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/status/{}", id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "processing");
    }
}
