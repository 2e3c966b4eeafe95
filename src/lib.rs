//! File storage gateway.
//!
//! Clients upload files in one shot or through a multipart session, the
//! bytes land in an object store, and one metadata record per finished
//! upload lands in a SQLite index.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
