//! [`ServiceManager`]: owns the plaintext and TLS listeners and reconciles
//! them with the desired running state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{KeepAwake, RouteDispatcher};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::connection::ConnectionContext;
use super::listener::Listener;
use super::tls::TlsFactory;
use super::ServerSettings;

/// The live pair of listeners. Both exist or neither does.
#[derive(Debug)]
struct Instances {
    http: Listener,
    https: Listener,
}

/// Addresses currently bound by the two listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundAddrs {
    pub http: Option<SocketAddr>,
    pub https: Option<SocketAddr>,
}

/// Controller for the two loopback listeners.
///
/// Every mutation goes through one async mutex, so concurrent `reconcile`
/// calls can never create a second listener for the same port.
pub struct ServiceManager {
    settings: ServerSettings,
    tls: TlsFactory,
    ctx: ConnectionContext,
    instances: Mutex<Option<Instances>>,
}

impl ServiceManager {
    /// Create a manager with nothing running.
    pub fn new(
        settings: ServerSettings,
        tls: TlsFactory,
        dispatcher: Arc<dyn RouteDispatcher>,
        keep_awake: Arc<dyn KeepAwake>,
    ) -> Self {
        let ctx = ConnectionContext {
            dispatcher,
            keep_awake,
            read_timeout: settings.read_timeout,
            keep_awake_max: settings.keep_awake_max,
        };
        Self {
            settings,
            tls,
            ctx,
            instances: Mutex::new(None),
        }
    }

    /// Bring the listeners in line with `enabled`.
    ///
    /// Enabling is idempotent: running listeners are left alone, missing or
    /// dead ones are (re)started. A listener that fails to bind is logged and
    /// retried on the next call. Disabling stops and discards both.
    pub async fn reconcile(&self, enabled: bool) {
        if enabled {
            self.ensure_running().await;
        } else {
            self.stop_all().await;
        }
    }

    /// Stop and discard both listeners. A no-op when nothing is running.
    pub async fn stop_all(&self) {
        let mut guard = self.instances.lock().await;
        let Some(mut instances) = guard.take() else {
            return;
        };
        debug!("stopping web service");
        instances.http.stop().await;
        instances.https.stop().await;
        info!("web service stopped");
    }

    /// `true` when both listeners exist and are accepting.
    pub async fn is_running(&self) -> bool {
        self.instances
            .lock()
            .await
            .as_ref()
            .is_some_and(|i| i.http.is_running() && i.https.is_running())
    }

    /// Addresses bound right now; `None` for a listener that is not running.
    pub async fn bound_addrs(&self) -> BoundAddrs {
        match self.instances.lock().await.as_ref() {
            Some(i) => BoundAddrs {
                http: i.http.local_addr(),
                https: i.https.local_addr(),
            },
            None => BoundAddrs::default(),
        }
    }

    async fn ensure_running(&self) {
        let mut guard = self.instances.lock().await;
        let instances = guard.get_or_insert_with(|| {
            debug!("starting new instances");
            Instances {
                http: Listener::new(self.settings.http_port, None, self.ctx.clone()),
                https: Listener::new(
                    self.settings.https_port,
                    Some(self.tls.acceptor().clone()),
                    self.ctx.clone(),
                ),
            }
        });

        for listener in [&mut instances.http, &mut instances.https] {
            if let Err(e) = listener.start_if_not_running().await {
                error!(port = listener.port(), tls = listener.use_tls(), error = %e, "listener failed to start");
            }
        }
    }
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Spawn a background task that re-reads the enable flag every `interval`
/// and reconciles the manager with it.
///
/// The first check fires after one full interval (the caller is expected to
/// have reconciled once at startup). When the flag cannot be read the current
/// state is kept and a warning is emitted.
pub fn reconcile_task<F>(
    manager: Arc<ServiceManager>,
    interval: Duration,
    mut enabled: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> anyhow::Result<bool> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match enabled() {
                Ok(flag) => manager.reconcile(flag).await,
                Err(e) => warn!(error = %e, "could not read enable flag; keeping current state"),
            }
        }
    })
}
