use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, RequestExt};
use serde_json::json;

/// This uses the `multer` crate (just like axum with the `multipart` feature
/// enabled) to parse upload request bodies. The driving clients send plain
/// `multipart/form-data` with repeatable `files` fields, one binary DICOM
/// part each.
pub struct DicomMultipart<'a>(multer::Multipart<'a>);

impl<'a> DicomMultipart<'a> {
	/// See [`multer::Multipart::next_field`]
	pub async fn next_field(&mut self) -> multer::Result<Option<multer::Field<'a>>> {
		self.0.next_field().await
	}
}

pub enum DicomMultipartRejection {
	InvalidBoundary,
}

impl IntoResponse for DicomMultipartRejection {
	fn into_response(self) -> Response {
		match self {
			Self::InvalidBoundary => (
				StatusCode::BAD_REQUEST,
				Json(json!({
					"error": "invalid_multipart",
					"message": "invalid `boundary` for `multipart/form-data` request",
				})),
			)
				.into_response(),
		}
	}
}

impl<S> FromRequest<S> for DicomMultipart<'_>
where
	S: Send + Sync,
{
	type Rejection = DicomMultipartRejection;

	async fn from_request(request: Request, _state: &S) -> Result<Self, Self::Rejection> {
		let boundary = request
			.headers()
			.get(CONTENT_TYPE)
			.map(HeaderValue::to_str)
			.and_then(Result::ok)
			.map(multer::parse_boundary)
			.and_then(Result::ok)
			.ok_or(Self::Rejection::InvalidBoundary)?;

		let stream = request.with_limited_body().into_body();
		let multipart = multer::Multipart::new(stream.into_data_stream(), boundary);
		Ok(Self(multipart))
	}
}
