//! Logging setup: structured JSON logs, optionally exported via OTLP.
//!
//! # Telemetry invariants
//!
//! - Response bodies are never logged, only their length, code and MIME type.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`).

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
