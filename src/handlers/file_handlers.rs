//! HTTP handlers for the file manager page and its form actions.
//!
//! Uploads and downloads are streamed; delegation to `FileService` keeps the
//! store coordination out of the HTTP layer.

use crate::{
    errors::AppError,
    services::{file_service::FileServiceError, object_store::ObjectStoreError},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Multipart, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{Html, Redirect, Response},
};
use axum_extra::extract::{Form, FormRejection};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tracing::{debug, warn};

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "myFile";

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub name: Option<String>,
}

/// Repeated `names` fields from the delete form's checkboxes.
#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    #[serde(default)]
    pub names: Vec<String>,
}

/// GET `/`: Render the listing page.
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let files = state.files.list_files().await?;
    let page = state.pages.render_index(&files)?;
    Ok(Html(page))
}

/// POST `/upload`: Store the `myFile` part, then go back to the listing.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Redirect, AppError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!("unreadable multipart body: {}", err);
                return Err(AppError::new(err.status(), format!("Error file: {}", err)));
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().filter(|name| !name.is_empty()) else {
            continue;
        };
        let filename = filename.to_string();
        let content_type = field.content_type().map(str::to_string);
        let body = field
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();

        state
            .files
            .upload(&filename, content_type.as_deref(), body)
            .await
            .map_err(upload_failure)?;
        return Ok(Redirect::to("/"));
    }

    debug!("upload without a `{}` file part", UPLOAD_FIELD);
    Err(AppError::bad_request("Error file"))
}

/// Status for a failed upload.
///
/// A body the client cut short or sent oversized is the client's fault (400 or
/// 413, as the multipart layer decides); anything else is a 500.
fn upload_failure(err: FileServiceError) -> AppError {
    let status = match &err {
        FileServiceError::ObjectStore(ObjectStoreError::Io(io_err)) => io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
            .map(MultipartError::status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(%status, "upload failed: {}", err);
    AppError::new(status, format!("Upload error: {}", err))
}

/// GET `/upload`: The form only posts; send browsers back to the listing.
pub async fn upload_redirect() -> Redirect {
    Redirect::to("/")
}

/// GET `/download?name=`: Stream a blob as an attachment.
pub async fn download(
    State(state): State<AppState>,
    Query(q): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let name = match q.name {
        Some(name) if !name.is_empty() => name,
        _ => return Err(AppError::bad_request("missing `name` query parameter")),
    };

    let stream = state.files.download(&name).await?;
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    Ok(response)
}

/// POST `/delete`: Remove every checked file; always back to the listing.
///
/// A form that can't be read counts as nothing checked.
pub async fn delete(
    State(state): State<AppState>,
    form: Result<Form<DeleteForm>, FormRejection>,
) -> Redirect {
    let names = match form {
        Ok(Form(form)) => form.names,
        Err(rejection) => {
            warn!("unreadable delete form, nothing removed: {}", rejection);
            Vec::new()
        }
    };
    // Per-key failures are logged by the service and never reach the user.
    let _report = state.files.delete(names).await;
    Redirect::to("/")
}

/// `attachment` disposition naming `name`.
///
/// The quoted `filename` is an ASCII fallback; `filename*` carries the exact
/// name percent-encoded as UTF-8.
fn content_disposition(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    let fallback: String = base
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(base)
    )
}
