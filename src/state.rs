//! Shared state handed to every handler.

use crate::services::{file_service::FileService, page_renderer::PageRenderer};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    pub pages: Arc<PageRenderer>,
}

impl AppState {
    pub fn new(files: FileService, pages: PageRenderer) -> Self {
        Self {
            files,
            pages: Arc::new(pages),
        }
    }
}
