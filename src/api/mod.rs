use crate::AppState;
use axum::Router;

mod home;
pub mod store;

pub fn routes() -> Router<AppState> {
	Router::new()
		.merge(home::routes())
		.nest("/dicom-web", store::routes())
}
