//! Test harness running a real bridge listener.
//!
//! Starts a [`BridgeListener`] on an ephemeral localhost port, backed by an
//! [`InMemoryDirectory`], so tests can drive it with any LDAP client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::backend::BridgeDirectory;
use crate::bridge::AuthenticationBridge;
use crate::config::{ListenConfig, UserLookupMode};
use crate::metrics::BridgeMetrics;
use crate::network::BridgeListener;

use super::memory_store::InMemoryDirectory;

/// A running bridge for integration tests.
pub struct BridgeTestHarness {
    /// Credential directory behind the bridge.
    pub directory: InMemoryDirectory,
    /// Metrics the bridge records into.
    pub metrics: Arc<BridgeMetrics>,
    listener: Arc<BridgeListener<BridgeDirectory>>,
    address: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<crate::error::Result<()>>>,
}

impl BridgeTestHarness {
    /// Start a bridge requiring application authentication, with flat lookup.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot bind a local port.
    pub async fn start(directory: InMemoryDirectory) -> Self {
        TestHarnessBuilder::new().start(directory).await
    }

    /// Create a builder for custom settings.
    #[must_use]
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Address the bridge is listening on.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// `ldap://` URL of the bridge.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ldap://{}", self.address)
    }

    /// Current number of open client connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.listener.active_connections()
    }

    /// Stop the listener and wait for its accept loop to finish.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for BridgeTestHarness {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Builder for [`BridgeTestHarness`].
#[derive(Debug, Clone)]
pub struct TestHarnessBuilder {
    require_app_auth: bool,
    lookup: UserLookupMode,
    max_connections: usize,
}

impl TestHarnessBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            require_app_auth: true,
            lookup: UserLookupMode::Flat,
            max_connections: 100,
        }
    }

    /// Whether the first bind must authenticate an application.
    #[must_use]
    pub fn require_app_auth(mut self, require: bool) -> Self {
        self.require_app_auth = require;
        self
    }

    /// User record lookup mode.
    #[must_use]
    pub fn lookup(mut self, lookup: UserLookupMode) -> Self {
        self.lookup = lookup;
        self
    }

    /// Connection limit.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Start the bridge.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot bind a local port.
    pub async fn start(self, directory: InMemoryDirectory) -> BridgeTestHarness {
        let metrics = Arc::new(BridgeMetrics::new());
        let bridge =
            AuthenticationBridge::new(directory.connector(), self.require_app_auth, self.lookup);
        let backend = BridgeDirectory::new(bridge).with_metrics(Arc::clone(&metrics));

        let listener = Arc::new(BridgeListener::new(
            ListenConfig {
                address: "127.0.0.1:0".to_string(),
                max_connections: self.max_connections,
            },
            Arc::new(backend),
            Arc::clone(&metrics),
        ));
        let socket = listener.bind().await.expect("failed to bind test listener");
        let address = socket.local_addr().expect("bound socket has an address");
        let shutdown_tx = listener.shutdown_handle();

        let serving = Arc::clone(&listener);
        let task = tokio::spawn(async move { serving.serve(socket).await });

        BridgeTestHarness {
            directory,
            metrics,
            listener,
            address,
            shutdown_tx,
            task: Some(task),
        }
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
