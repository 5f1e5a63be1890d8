//! Core library for the Poets content-generation orchestrator.
//!
//! This crate contains all business logic: configuration management, the
//! shared SQLite store, the single-instance process lock, LLM-driven agent
//! sessions, structured-JSON harvesting, media pipelines, and the queue
//! processor that ties them together. The `poets-cli` binary is a thin
//! dispatch layer over this crate.

pub mod agents;
pub mod config;
pub mod error;
pub mod harvest;
pub mod health;
pub mod llm;
pub mod lock;
pub mod media;
pub mod processor;
pub mod research;
pub mod storage;

pub use error::*;

/// Returns the version of the poets-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
