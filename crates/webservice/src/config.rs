//! Configuration loading and validation for the loopback web service.
//!
//! All values are read from environment variables. The enable flag is re-read
//! periodically by the reconcile task, so it is the only field expected to
//! change while the process runs.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::server::ServerSettings;

/// Validated web service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Whether the listeners should be running.
    #[serde(default)]
    pub webservice_enabled: bool,

    /// Loopback port of the plaintext listener.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Loopback port of the TLS listener.
    #[serde(default = "default_https_port")]
    pub https_port: u16,

    /// Idle timeout (seconds) applied to every read and to the TLS handshake.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Upper bound (milliseconds) on the keep-awake lock held per connection.
    #[serde(default = "default_keep_awake_ms")]
    pub keep_awake_ms: u64,

    /// How often (seconds) the enable flag is re-read.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Optional PEM certificate chain replacing the embedded one.
    pub tls_cert_path: Option<String>,

    /// Optional PEM private key replacing the embedded one.
    pub tls_key_path: Option<String>,

    /// Optional OTLP endpoint; spans are only exported when set.
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_http_port() -> u16 {
    17580
}
fn default_https_port() -> u16 {
    17581
}
fn default_read_timeout() -> u64 {
    10
}
fn default_keep_awake_ms() -> u64 {
    20_000
}
fn default_reconcile_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webservice_enabled: false,
            http_port: default_http_port(),
            https_port: default_https_port(),
            read_timeout_secs: default_read_timeout(),
            keep_awake_ms: default_keep_awake_ms(),
            reconcile_interval_secs: default_reconcile_interval(),
            tls_cert_path: None,
            tls_key_path: None,
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Listener settings derived from this configuration.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            http_port: self.http_port,
            https_port: self.https_port,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            keep_awake_max: Duration::from_millis(self.keep_awake_ms),
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.http_port == 0 || self.https_port == 0 {
            anyhow::bail!("HTTP_PORT and HTTPS_PORT must be non-zero");
        }
        if self.http_port == self.https_port {
            anyhow::bail!("HTTP_PORT and HTTPS_PORT must differ (both {})", self.http_port);
        }
        if self.read_timeout_secs == 0 {
            anyhow::bail!("READ_TIMEOUT_SECS must be > 0");
        }
        if self.keep_awake_ms == 0 {
            anyhow::bail!("KEEP_AWAKE_MS must be > 0");
        }
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("RECONCILE_INTERVAL_SECS must be > 0");
        }
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together")
            }
            _ => {}
        }
        Ok(())
    }
}
