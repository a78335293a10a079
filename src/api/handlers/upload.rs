use crate::AppState;
use crate::api::error::AppError;
use crate::services::upload_service::types::{UploadError, UploadReport, UploadSession};
use axum::{
    Json,
    extract::{Query, Request, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Channel the progress events for this upload are published on
    #[validate(length(min = 1, max = 128))]
    pub socket_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub field_name: String,
    pub filename: String,
    pub bytes: u64,
    pub state: String,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub session_id: String,
    pub files: Vec<UploadedFile>,
    pub error: Option<String>,
}

fn report_status(report: &UploadReport) -> StatusCode {
    match &report.fatal {
        Some(UploadError::Parse(_) | UploadError::StreamInterrupted(_)) => StatusCode::BAD_REQUEST,
        Some(UploadError::PayloadTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
        Some(UploadError::Timeout(_)) => StatusCode::REQUEST_TIMEOUT,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
        None if report.failures().next().is_some() => StatusCode::MULTI_STATUS,
        None => StatusCode::OK,
    }
}

impl From<UploadReport> for UploadResponse {
    fn from(report: UploadReport) -> Self {
        UploadResponse {
            session_id: report.session_id,
            files: report
                .transfers
                .into_iter()
                .map(|t| UploadedFile {
                    field_name: t.field_name,
                    filename: t.filename,
                    bytes: t.bytes_processed,
                    state: t.state.as_str().to_string(),
                    error: t.error,
                })
                .collect(),
            error: report.fatal.map(|e| e.to_string()),
        }
    }
}

#[utoipa::path(
    post,
    path = "/upload",
    params(UploadQuery),
    request_body(
        content = String,
        description = "multipart/form-data body with one or more file parts",
        content_type = "multipart/form-data"
    ),
    responses(
        (status = 200, description = "Every file was stored", body = UploadResponse),
        (status = 207, description = "Some files failed to store", body = UploadResponse),
        (status = 400, description = "Malformed or interrupted multipart body", body = UploadResponse),
        (status = 408, description = "Upload exceeded the session timeout", body = UploadResponse),
        (status = 413, description = "Request body exceeds the configured size limit", body = UploadResponse)
    ),
    tag = "upload"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    query
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let session = UploadSession {
        session_id: query.socket_id,
        destination_root: state.config.downloads_dir.clone(),
        throttle_interval_ms: state.config.progress_interval_ms,
        timeout: state.config.session_timeout,
    };

    let (tx, rx) = oneshot::channel();
    state
        .coordinator
        .run(session, request, move |report| {
            let _ = tx.send(report);
        })
        .await;

    let report = rx
        .await
        .map_err(|_| AppError::Internal("upload finished without a report".to_string()))?;

    if !report.is_success() {
        tracing::warn!(
            "Upload session {} finished with {} failed file(s){}",
            report.session_id,
            report.failures().count(),
            report
                .fatal
                .as_ref()
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        );
    }

    let status = report_status(&report);
    Ok((status, Json(report.into())))
}
