//! Loopback-only HTTP/HTTPS service for companion devices that can only speak
//! plain HTTP.
//!
//! Two listeners run on `127.0.0.1`: plaintext on 17580 and TLS on 17581.
//! Each connection carries exactly one `GET` request whose route is handed to
//! a host-supplied [`common::RouteDispatcher`]; the reply is an `HTTP/1.0`
//! response and the connection is closed.

pub mod config;
pub mod routes;
pub mod server;
pub mod telemetry;

pub use config::Config;
pub use server::{ServerSettings, ServiceManager, TlsFactory};
