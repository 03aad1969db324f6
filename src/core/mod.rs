//! Core translation engine: configuration, limits, orchestration and progress

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod rate_limiter;
pub mod retry;
