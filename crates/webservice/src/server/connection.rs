//! Handling of a single accepted connection.
//!
//! One call to [`handle_connection`] owns the socket from accept to close:
//!
//! 1. Takes a keep-awake lock, released when the handler returns.
//! 2. Runs the TLS handshake first when the listener is TLS-wrapped.
//! 3. Reads lines until the `GET /` request line (see [`super::request`]).
//! 4. Dispatches the route and writes either the framed response or a bare
//!    `500 Internal Server Error`.
//!
//! A timeout or handshake failure ends the connection without writing
//! anything. The socket is dropped exactly once, when the handler returns.

use std::sync::Arc;
use std::time::Duration;

use common::{KeepAwake, RouteDispatcher, ServiceError, WakeHandle, WebResponse};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

use super::request::read_route;
use super::tls;

/// Tag passed to the keep-awake capability for every connection.
pub const KEEP_AWAKE_TAG: &str = "webservice-handler";

/// Largest slice of a body handed to a single timed write.
pub const WRITE_CHUNK_BYTES: usize = 16 * 1024;

/// Bare error reply: status line and a blank line, no headers, no body.
pub const SERVER_ERROR_RESPONSE: &[u8] = b"HTTP/1.0 500 Internal Server Error\r\n\r\n";

/// Everything a connection task needs, shared by all tasks of a listener.
#[derive(Clone)]
pub struct ConnectionContext {
    pub dispatcher: Arc<dyn RouteDispatcher>,
    pub keep_awake: Arc<dyn KeepAwake>,
    /// Bound on every read and on the TLS handshake.
    pub read_timeout: Duration,
    /// Bound passed to [`KeepAwake::acquire`].
    pub keep_awake_max: Duration,
}

/// How a connection that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A dispatcher response was sent.
    Served { result_code: u16, bytes: usize },
    /// A 500 was sent because no route or no content was available.
    ServerError,
}

/// Releases the keep-awake lock on drop, whichever way the handler exits.
struct WakeGuard {
    keep_awake: Arc<dyn KeepAwake>,
    handle: WakeHandle,
}

impl WakeGuard {
    fn acquire(keep_awake: &Arc<dyn KeepAwake>, max_duration: Duration) -> Self {
        let handle = keep_awake.acquire(KEEP_AWAKE_TAG, max_duration);
        Self {
            keep_awake: Arc::clone(keep_awake),
            handle,
        }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.keep_awake.release(self.handle);
    }
}

/// Handle one accepted connection to completion.
///
/// Never returns an error: every failure is logged here and confined to this
/// connection.
pub async fn handle_connection(stream: TcpStream, tls: Option<TlsAcceptor>, ctx: ConnectionContext) {
    let _wake = WakeGuard::acquire(&ctx.keep_awake, ctx.keep_awake_max);

    let result = match tls {
        None => serve(stream, &ctx).await,
        Some(acceptor) => match handshake(&acceptor, stream, ctx.read_timeout).await {
            Ok(tls_stream) => serve(tls_stream, &ctx).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(Outcome::Served { result_code, bytes }) => {
            debug!(bytes, result_code, "sent response");
        }
        Ok(Outcome::ServerError) => {
            error!("internal server error reply");
        }
        Err(ServiceError::Timeout(after)) => {
            debug!(?after, "socket timeout");
        }
        Err(e @ ServiceError::Handshake(_)) => {
            warn!(error = %e, "TLS handshake failed");
        }
        Err(e) if e.is_peer_failure() => {
            warn!(error = %e, "connection error");
        }
        Err(e) => {
            error!(error = %e, "connection error");
        }
    }
}

/// Run the server side of the TLS handshake, bounded by `read_timeout`.
async fn handshake(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    read_timeout: Duration,
) -> Result<tokio_rustls::server::TlsStream<TcpStream>, ServiceError> {
    debug!("attempting TLS handshake");
    let tls_stream = timeout(read_timeout, acceptor.accept(stream))
        .await
        .map_err(|_| ServiceError::Timeout(read_timeout))?
        .map_err(ServiceError::Handshake)?;
    tls::log_session(&tls_stream);
    Ok(tls_stream)
}

/// Read the request, dispatch it, and write the reply on `stream`.
///
/// Generic over the transport so the plaintext and TLS paths share it.
pub async fn serve<S>(stream: S, ctx: &ConnectionContext) -> Result<Outcome, ServiceError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    let response = match read_route(&mut stream, ctx.read_timeout).await? {
        Some(route) => {
            debug!(%route, "received request");
            dispatch(&ctx.dispatcher, route).await
        }
        None => None,
    };

    let outcome = write_response(&mut stream, response.as_ref(), ctx.read_timeout).await?;

    // Best effort: FIN for TCP, close_notify for TLS. The peer may already be gone.
    let _ = timeout(ctx.read_timeout, stream.shutdown()).await;
    Ok(outcome)
}

/// Call the dispatcher on the blocking pool; a panic counts as no response.
async fn dispatch(dispatcher: &Arc<dyn RouteDispatcher>, route: String) -> Option<WebResponse> {
    let dispatcher = Arc::clone(dispatcher);
    match tokio::task::spawn_blocking(move || dispatcher.dispatch(&route)).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "route dispatcher failed");
            None
        }
    }
}

/// Write the framed reply, or the bare 500 when there is nothing to send.
///
/// `write_timeout` bounds each chunk of at most [`WRITE_CHUNK_BYTES`], not the
/// whole reply, so a slow reader still receives a large body in full as long
/// as it keeps draining.
async fn write_response<W>(
    out: &mut W,
    response: Option<&WebResponse>,
    write_timeout: Duration,
) -> Result<Outcome, ServiceError>
where
    W: AsyncWrite + Unpin,
{
    let Some(WebResponse {
        result_code,
        mime_type,
        bytes: Some(body),
    }) = response
    else {
        write_timed(out, SERVER_ERROR_RESPONSE, write_timeout).await?;
        flush_timed(out, write_timeout).await?;
        return Ok(Outcome::ServerError);
    };

    debug!(result_code, %mime_type, "writing response");
    let head = response_head(*result_code, mime_type, body.len());
    write_timed(out, head.as_bytes(), write_timeout).await?;
    for chunk in body.chunks(WRITE_CHUNK_BYTES) {
        write_timed(out, chunk, write_timeout).await?;
    }
    flush_timed(out, write_timeout).await?;

    Ok(Outcome::Served {
        result_code: *result_code,
        bytes: body.len(),
    })
}

async fn write_timed<W>(out: &mut W, buf: &[u8], write_timeout: Duration) -> Result<(), ServiceError>
where
    W: AsyncWrite + Unpin,
{
    timeout(write_timeout, out.write_all(buf))
        .await
        .map_err(|_| ServiceError::Timeout(write_timeout))?
        .map_err(ServiceError::from)
}

async fn flush_timed<W>(out: &mut W, write_timeout: Duration) -> Result<(), ServiceError>
where
    W: AsyncWrite + Unpin,
{
    timeout(write_timeout, out.flush())
        .await
        .map_err(|_| ServiceError::Timeout(write_timeout))?
        .map_err(ServiceError::from)
}

/// Status line and headers of a successful reply, including the blank line.
pub fn response_head(result_code: u16, mime_type: &str, content_length: usize) -> String {
    format!(
        "HTTP/1.0 {result_code} OK\r\nContent-Type: {mime_type}\r\nContent-Length: {content_length}\r\n\r\n"
    )
}
