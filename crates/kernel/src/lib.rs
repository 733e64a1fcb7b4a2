//! Agora forum REST kernel.
//!
//! Compiles client filters into collection queries for forums, topics and
//! replies, and bridges topic and reply writes into the legacy handlers.
//! The `agora` binary serves the API.

pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod fields;
pub mod init;
pub mod legacy;
pub mod middleware;
pub mod models;
pub mod permissions;
pub mod query;
pub mod routes;
pub mod state;
