//! MCP Build Server Library
//!
//! Core modules for the asynchronous container build pipeline.

pub mod adapters;
pub mod app;
pub mod errors;
pub mod logs;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod settings;
