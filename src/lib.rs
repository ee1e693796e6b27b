//! Browser-based file manager over S3-compatible object storage, with an
//! optional SQL table recording what was uploaded.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
