use crate::api::store::{OverallStatus, StoreError, StoreResponse};
use crate::utils::multipart::DicomMultipart;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::instrument;

/// HTTP router for the store transaction.
pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/studies", post(studies))
		.route("/study/{study_id}", post(study))
}

#[instrument(skip_all)]
async fn study(
	State(state): State<AppState>,
	Path(study_id): Path<String>,
	multipart: DicomMultipart<'static>,
) -> Response {
	match state.store.store(&study_id, multipart).await {
		Ok(summary) => (response_status(&summary), Json(summary)).into_response(),
		Err(err) => error_response(&err),
	}
}

/// Storing without a study path segment would require reading the Study ID
/// out of each data set, and this server does not parse DICOM data sets.
async fn studies() -> impl IntoResponse {
	(
		StatusCode::NOT_IMPLEMENTED,
		Json(json!({
			"error": "not_implemented",
			"message": "deriving the study from file contents is not supported; \
			            use POST /dicom-web/study/{study_id}",
		})),
	)
}

fn response_status(summary: &StoreResponse) -> StatusCode {
	match summary.overall_status {
		OverallStatus::Success => StatusCode::CREATED,
		OverallStatus::Partial => StatusCode::OK,
		OverallStatus::Failed => {
			// Entirely rejected input is the client's fault; anything else
			// means at least one file hit a server-side failure.
			if summary
				.results
				.iter()
				.all(|result| result.status == crate::api::store::FileStatus::Rejected)
			{
				StatusCode::BAD_REQUEST
			} else {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		}
	}
}

fn error_response(err: &StoreError) -> Response {
	let (status, code) = match err {
		StoreError::InvalidIdentifier(_) => (StatusCode::BAD_REQUEST, "invalid_identifier"),
		StoreError::NoFilesProvided => (StatusCode::BAD_REQUEST, "no_files_provided"),
		StoreError::StorageUnavailable(_) => {
			(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
		}
		StoreError::Multipart(_) => (StatusCode::BAD_REQUEST, "invalid_multipart"),
	};
	(
		status,
		Json(json!({
			"error": code,
			"message": err.to_string(),
		})),
	)
		.into_response()
}
