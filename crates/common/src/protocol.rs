//! Request and response types exchanged between the socket server and the
//! host application's route dispatcher.

use bytes::Bytes;

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Content produced by a [`RouteDispatcher`] for a single route.
///
/// Immutable once returned. A response without `bytes` is treated by the
/// server exactly like an unknown route and answered with a 500.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResponse {
    /// Status code written into the `HTTP/1.0 <code> OK` line.
    pub result_code: u16,
    /// Value of the `Content-Type` header.
    pub mime_type: String,
    /// Raw body, sent verbatim.
    pub bytes: Option<Bytes>,
}

impl WebResponse {
    /// Construct a `200` response with the given MIME type and body.
    pub fn ok(mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::with_code(200, mime_type, bytes)
    }

    /// Construct a response with an explicit result code.
    pub fn with_code(result_code: u16, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            result_code,
            mime_type: mime_type.into(),
            bytes: Some(bytes.into()),
        }
    }

    /// Construct a response that carries no body.
    pub fn empty(result_code: u16, mime_type: impl Into<String>) -> Self {
        Self {
            result_code,
            mime_type: mime_type.into(),
            bytes: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch capability
// ---------------------------------------------------------------------------

/// Maps a decoded route to content.
///
/// Implemented by the host application. The server calls it from many
/// connection tasks at once, on a blocking-capable thread, so implementations
/// may do synchronous work but must be `Send + Sync`.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait RouteDispatcher: Send + Sync {
    /// Produce the response for `route`, or `None` if the route is unknown.
    ///
    /// `route` is already percent-decoded and has no leading `/`.
    fn dispatch(&self, route: &str) -> Option<WebResponse>;
}
