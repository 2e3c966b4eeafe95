//! Core data models for the file gateway.
//!
//! [`file::FileRecord`] maps to the `files` table via `sqlx::FromRow` and is
//! what clients see as JSON. The multipart types describe in-flight upload
//! sessions, which never touch the database.

pub mod file;
pub mod multipart;
