//! One loopback listening socket and its accept loop.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::ServiceError;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::connection::{handle_connection, ConnectionContext};

/// At most one connection waits in the kernel queue; further callers are
/// refused by the transport until it is accepted.
pub const LISTEN_BACKLOG: u32 = 1;

/// Bind `127.0.0.1:<port>` with [`LISTEN_BACKLOG`].
///
/// The address is fixed here; there is no way to bind anything but loopback.
pub fn bind_loopback(port: u16) -> Result<TcpListener, ServiceError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let bind_err = |source| ServiceError::Bind { port, source };

    let socket = TcpSocket::new_v4().map_err(bind_err)?;
    // Lets a re-enable rebind while old connections sit in TIME_WAIT.
    #[cfg(unix)]
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)
}

/// A plaintext or TLS listener on a fixed loopback port.
///
/// `start` and `stop` take `&mut self`; the [`super::ServiceManager`] is the
/// only owner and serialises every call.
pub struct Listener {
    port: u16,
    tls: Option<TlsAcceptor>,
    ctx: ConnectionContext,
    running: bool,
    stopping: Arc<AtomicBool>,
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Create a stopped listener. Nothing is bound until [`Listener::start`].
    pub fn new(port: u16, tls: Option<TlsAcceptor>, ctx: ConnectionContext) -> Self {
        Self {
            port,
            tls,
            ctx,
            running: false,
            stopping: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            local_addr: None,
            task: None,
        }
    }

    /// Configured port (`0` means "any free port", used by tests).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Address actually bound, while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `true` while started and the accept loop has not died on an error.
    pub fn is_running(&self) -> bool {
        self.running && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Bind the socket and launch the accept loop.
    ///
    /// Does nothing while the current accept loop is alive, so the socket it
    /// owns stays reachable by [`Listener::stop`].
    ///
    /// # Errors
    ///
    /// [`ServiceError::Bind`] if the port cannot be bound; the listener stays
    /// stopped and may be started again later.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        if self.is_running() {
            debug!(port = self.port, "already running");
            return Ok(());
        }
        let listener = bind_loopback(self.port)?;
        let local_addr = listener.local_addr()?;

        self.stopping = Arc::new(AtomicBool::new(false));
        self.shutdown = CancellationToken::new();

        let span = info_span!("listener", port = local_addr.port(), tls = self.use_tls());
        let task = tokio::spawn(
            accept_loop(
                listener,
                self.tls.clone(),
                self.ctx.clone(),
                self.shutdown.clone(),
                Arc::clone(&self.stopping),
            )
            .instrument(span),
        );

        info!(addr = %local_addr, tls = self.use_tls(), "listening");
        self.local_addr = Some(local_addr);
        self.task = Some(task);
        self.running = true;
        Ok(())
    }

    /// Start unless already running. Returns `true` if a new loop was launched.
    ///
    /// A listener whose accept loop ended on an error is reaped and rebound.
    ///
    /// # Errors
    ///
    /// See [`Listener::start`].
    pub async fn start_if_not_running(&mut self) -> Result<bool, ServiceError> {
        if self.is_running() {
            return Ok(false);
        }
        debug!(port = self.port, "not running so starting");
        self.stop().await;
        self.start()?;
        Ok(true)
    }

    /// Stop accepting and close the listening socket.
    ///
    /// Idempotent, and safe on a listener that was never started. Returns once
    /// the socket is closed; connections already accepted keep running.
    pub async fn stop(&mut self) {
        self.running = false;
        self.stopping.store(true, Ordering::Release);
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(port = self.port, error = %e, "accept loop task failed");
            }
        }
        self.local_addr = None;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::Release);
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("port", &self.port)
            .field("tls", &self.use_tls())
            .field("running", &self.running)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Accept connections until shut down, handing each to its own task.
///
/// The listening socket is closed when this returns.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    ctx: ConnectionContext,
    shutdown: CancellationToken,
    stopping: Arc<AtomicBool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                let span = info_span!(
                    "connection",
                    id = %Uuid::new_v4(),
                    tls = tls.is_some(),
                    %peer_addr,
                );
                tokio::spawn(handle_connection(stream, tls.clone(), ctx.clone()).instrument(span));
            }
            Err(e) if stopping.load(Ordering::Acquire) => {
                debug!(error = %e, "accept interrupted by shutdown");
                break;
            }
            Err(e) => {
                error!(error = %e, "web server error; listener stopped");
                break;
            }
        }
    }
    debug!("accept loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{NoopKeepAwake, RouteDispatcher, WebResponse};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Echo;

    impl RouteDispatcher for Echo {
        fn dispatch(&self, route: &str) -> Option<WebResponse> {
            Some(WebResponse::ok("text/plain", route.to_owned()))
        }
    }

    fn context() -> ConnectionContext {
        ConnectionContext {
            dispatcher: Arc::new(Echo),
            keep_awake: Arc::new(NoopKeepAwake),
            read_timeout: Duration::from_secs(5),
            keep_awake_max: Duration::from_secs(20),
        }
    }

    async fn get(addr: SocketAddr, route: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET /{route} HTTP/1.0\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn binds_loopback_only() {
        let listener = bind_loopback(0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn occupied_port_is_a_bind_error() {
        let taken = bind_loopback(0).unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind_loopback(port).unwrap_err();
        assert!(matches!(err, ServiceError::Bind { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn serves_until_stopped() {
        let mut listener = Listener::new(0, None, context());
        assert!(!listener.is_running());
        listener.start().unwrap();
        assert!(listener.is_running());

        let addr = listener.local_addr().unwrap();
        let reply = get(addr, "status").await;
        assert!(reply.ends_with(b"\r\n\r\nstatus"));

        listener.stop().await;
        assert!(!listener.is_running());
        assert!(listener.local_addr().is_none());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut never_started = Listener::new(0, None, context());
        never_started.stop().await;
        never_started.stop().await;
        assert!(!never_started.is_running());

        let mut listener = Listener::new(0, None, context());
        listener.start().unwrap();
        listener.stop().await;
        listener.stop().await;
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn second_start_keeps_the_first_socket() {
        let mut listener = Listener::new(0, None, context());
        listener.start().unwrap();
        let first = listener.local_addr().unwrap();
        listener.start().unwrap();
        assert_eq!(listener.local_addr(), Some(first));

        listener.stop().await;
        assert!(!listener.is_running());
        assert!(TcpStream::connect(first).await.is_err());
    }

    #[tokio::test]
    async fn start_if_not_running_is_idempotent() {
        let mut listener = Listener::new(0, None, context());
        assert!(listener.start_if_not_running().await.unwrap());
        let addr = listener.local_addr();
        assert!(!listener.start_if_not_running().await.unwrap());
        assert_eq!(listener.local_addr(), addr);
        listener.stop().await;
    }

    #[tokio::test]
    async fn restart_after_stop_serves_again() {
        let mut listener = Listener::new(0, None, context());
        listener.start().unwrap();
        listener.stop().await;
        listener.start().unwrap();
        let reply = get(listener.local_addr().unwrap(), "again").await;
        assert!(reply.ends_with(b"again"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn slow_connection_does_not_block_accept() {
        let mut listener = Listener::new(0, None, context());
        listener.start().unwrap();
        let addr = listener.local_addr().unwrap();

        // Connected but silent: its handler waits on the read timeout.
        let _idle = TcpStream::connect(addr).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(3), get(addr, "fast"))
            .await
            .unwrap();
        assert!(reply.ends_with(b"fast"));
        listener.stop().await;
    }
}
