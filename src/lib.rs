pub mod api;
pub mod backend;
pub mod config;
pub mod metadata;
pub mod storage;
pub mod utils;

use crate::api::store::StoreService;
use crate::config::AppConfig;
use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::Next;
use axum::response::Response;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace;
use tracing::Level;

#[derive(Clone)]
pub struct AppState {
	pub config: AppConfig,
	pub store: Arc<dyn StoreService>,
}

/// Assembles the full middleware stack around the API routes.
pub fn router(state: AppState) -> Router {
	api::routes()
		.layer(CorsLayer::permissive())
		.layer(axum::middleware::from_fn(add_common_headers))
		.layer(
			tower_http::trace::TraceLayer::new_for_http()
				.make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
				.on_request(trace::DefaultOnRequest::new().level(Level::INFO))
				.on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
		)
		.layer(DefaultBodyLimit::max(state.config.server.http.max_upload_size))
		.layer(TimeoutLayer::new(Duration::from_secs(
			state.config.server.http.request_timeout,
		)))
		.with_state(state)
}

async fn add_common_headers(req: Request, next: Next) -> Response {
	let mut response = next.run(req).await;
	let server_name = concat!("DICOM-Vault/", env!("CARGO_PKG_VERSION"));
	let headers = response.headers_mut();
	headers.insert("Server", axum::http::HeaderValue::from_static(server_name));
	response
}
