//! Common types, capability traits, and errors shared across the loopback web
//! service crates.

pub mod error;
pub mod keep_awake;
pub mod protocol;

pub use error::ServiceError;
pub use keep_awake::{KeepAwake, NoopKeepAwake, WakeHandle};
pub use protocol::{RouteDispatcher, WebResponse};

#[cfg(any(test, feature = "mocks"))]
pub use keep_awake::MockKeepAwake;
#[cfg(any(test, feature = "mocks"))]
pub use protocol::MockRouteDispatcher;
