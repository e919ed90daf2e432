//! Process-wide client TLS initialization.
//!
//! TLS material is loaded once per process and shared by every connection
//! that asks for TLS. [`SecurityContext::initialize`] is idempotent for an
//! equal configuration and rejects a conflicting one; it must run before any
//! replicator or processor that should use TLS is built, because those
//! capture the context at construction time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::info;

use crate::error::{ClientError, ClientResult};
use crate::pem;

static CONTEXT: Mutex<Option<Arc<SecurityContext>>> = Mutex::new(None);

/// Paths to the TLS material for outbound proxy connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    /// CA bundle used to verify the proxy certificate.
    pub ca_cert_path: PathBuf,
    /// Client certificate chain for mutual TLS (optional).
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS (optional).
    pub client_key_path: Option<PathBuf>,
    /// Override for the TLS server name; defaults to the endpoint host.
    pub server_name: Option<String>,
}

impl SecurityConfig {
    /// Creates a configuration that verifies the proxy against `ca_cert_path`.
    pub fn new(ca_cert_path: impl Into<PathBuf>) -> Self {
        Self {
            ca_cert_path: ca_cert_path.into(),
            client_cert_path: None,
            client_key_path: None,
            server_name: None,
        }
    }

    /// Enables mutual TLS with the given client certificate and key.
    #[must_use]
    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Overrides the TLS server name presented during the handshake.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Loaded client TLS material, shared process-wide.
#[derive(Debug)]
pub struct SecurityContext {
    config: SecurityConfig,
    tls: Arc<ClientConfig>,
}

impl SecurityContext {
    /// Initializes the process-wide client TLS context.
    ///
    /// The first call loads and validates the material; a later call with an
    /// equal configuration returns the existing context, and a call with a
    /// different configuration is an error. A load failure leaves the
    /// process-wide slot empty so initialization can be retried.
    pub fn initialize(config: &SecurityConfig) -> ClientResult<Arc<SecurityContext>> {
        let mut slot = CONTEXT
            .lock()
            .map_err(|_| ClientError::Security("security context lock poisoned".to_string()))?;

        if let Some(existing) = slot.as_ref() {
            if existing.config == *config {
                return Ok(Arc::clone(existing));
            }
            return Err(ClientError::Security(
                "security context already initialized with a different configuration".to_string(),
            ));
        }

        let context = Arc::new(Self::build(config)?);
        info!(ca = %config.ca_cert_path.display(), mutual = config.client_cert_path.is_some(),
            "client TLS initialized");
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Returns the process-wide context, if one has been initialized.
    pub fn current() -> Option<Arc<SecurityContext>> {
        CONTEXT.lock().ok().and_then(|slot| slot.clone())
    }

    fn build(config: &SecurityConfig) -> ClientResult<Self> {
        if config.client_cert_path.is_some() != config.client_key_path.is_some() {
            return Err(ClientError::Security(
                "client certificate and key must be configured together".to_string(),
            ));
        }

        let mut roots = RootCertStore::empty();
        for cert in pem::read_certificates(&config.ca_cert_path)? {
            roots
                .add(cert)
                .map_err(|e| ClientError::Security(format!("invalid CA certificate: {e}")))?;
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);

        let tls = if let (Some(cert_path), Some(key_path)) =
            (&config.client_cert_path, &config.client_key_path)
        {
            let certs = pem::read_certificates(cert_path)?;
            let key = pem::read_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::Security(format!("invalid client certificate: {e}")))?
        } else {
            builder.with_no_client_auth()
        };

        Ok(Self {
            config: config.clone(),
            tls: Arc::new(tls),
        })
    }

    /// TLS connector for outbound connections.
    pub(crate) fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::clone(&self.tls))
    }

    /// Configured server-name override, if any.
    pub(crate) fn server_name(&self) -> Option<&str> {
        self.config.server_name.as_deref()
    }
}
