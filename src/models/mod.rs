//! Data models for the file service.
//!
//! `FileRecord` maps to the metadata table via `sqlx::FromRow`; the other
//! types are the JSON bodies of the HTTP surface.

pub mod file_record;
