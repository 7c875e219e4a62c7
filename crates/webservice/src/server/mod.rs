//! Loopback HTTP/HTTPS socket server.
//!
//! # Responsibilities
//! - Bind the plaintext and TLS listeners on `127.0.0.1` (never any other
//!   address) with a backlog of one.
//! - Run one accept loop per listener and one task per connection.
//! - Parse the request line, hand the route to the injected
//!   [`common::RouteDispatcher`], and frame the reply.
//! - Start and stop both listeners as a unit through [`ServiceManager`].

use std::time::Duration;

pub mod connection;
pub mod listener;
pub mod manager;
pub mod request;
pub mod tls;

pub use listener::Listener;
pub use manager::{reconcile_task, BoundAddrs, ServiceManager};
pub use tls::TlsFactory;

/// Ports and timeouts used by the [`ServiceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub http_port: u16,
    pub https_port: u16,
    /// Idle bound on each read and on the TLS handshake.
    pub read_timeout: Duration,
    /// Upper bound on the keep-awake lock held per connection.
    pub keep_awake_max: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 17580,
            https_port: 17581,
            read_timeout: Duration::from_secs(10),
            keep_awake_max: Duration::from_secs(20),
        }
    }
}
