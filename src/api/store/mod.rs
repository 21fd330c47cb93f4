pub mod routes;
mod service;

pub use routes::routes;

pub use service::{
	FileStatus, OverallStatus, StoreError, StoreResponse, StoreService, UploadResult,
};
