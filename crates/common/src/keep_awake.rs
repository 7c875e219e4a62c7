//! Keep-awake capability consumed by the connection handler.
//!
//! On a mobile host this is backed by a platform wake lock. The server only
//! needs to acquire one before reading from a client and release it once the
//! connection is closed; everything else is up to the host.

use std::time::Duration;

/// Opaque token identifying one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakeHandle(pub u64);

/// Prevents the host from sleeping while a connection is being handled.
///
/// Both methods are infallible from the caller's point of view: a host that
/// does not support wake locks, or fails to take one, must still return a
/// handle and must accept it back in [`KeepAwake::release`].
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait KeepAwake: Send + Sync {
    /// Acquire a wake lock that expires on its own after `max_duration`.
    fn acquire(&self, tag: &str, max_duration: Duration) -> WakeHandle;

    /// Release a previously acquired lock. Releasing twice is harmless.
    fn release(&self, handle: WakeHandle);
}

/// [`KeepAwake`] for hosts without any sleep management.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeepAwake;

impl KeepAwake for NoopKeepAwake {
    fn acquire(&self, _tag: &str, _max_duration: Duration) -> WakeHandle {
        WakeHandle(0)
    }

    fn release(&self, _handle: WakeHandle) {}
}
