//! Data models.

pub mod post;

pub use post::{API_PREFIX, Post, PostType};
