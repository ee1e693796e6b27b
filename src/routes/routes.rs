//! Defines the routes of the file manager.
//!
//! ## Structure
//! - **Page**
//!   - `GET  /`         HTML listing with upload and delete forms
//! - **Form actions**
//!   - `POST /upload`   multipart upload (field `myFile`), 303 to `/`
//!   - `GET  /upload`   303 to `/`
//!   - `POST /delete`   delete checked `names`, 303 to `/`
//! - **Blobs**
//!   - `GET  /download` stream `?name=` as an attachment
//! - **Probes**
//!   - `GET  /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{delete, download, index, upload, upload_redirect},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build and return the router for all file manager routes.
///
/// `body_limit` caps request bodies, which bounds upload size.
pub fn routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(index))
        .route("/upload", post(upload).get(upload_redirect))
        .route("/download", get(download))
        .route("/delete", post(delete))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
