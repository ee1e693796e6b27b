//! Services behind the HTTP layer: the two stores, the coordinator that ties
//! them together, and the page renderer.

pub mod file_service;
pub mod metadata_store;
pub mod object_store;
pub mod page_renderer;
