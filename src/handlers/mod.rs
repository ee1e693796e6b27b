//! HTTP handlers, grouped by concern.

pub mod file_handlers;
pub mod health_handlers;
