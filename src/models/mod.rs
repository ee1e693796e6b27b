//! Core data models for the file manager.
//!
//! `FileRecord` maps a row of the `files` metadata table via `sqlx::FromRow`;
//! `ObjectInfo` is what an object-store enumeration yields. Both are folded
//! into `StoredFile`, the render-ready listing entry.

pub mod file_record;
pub mod stored_file;
