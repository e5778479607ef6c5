//! Renderer orchestration for diagram source: prioritized fallback across
//! rendering backends, input validation, error classification and output
//! content safety, with a TTL result cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
