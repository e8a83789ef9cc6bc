//! TCP listener for accepting LDAP client connections.
//!
//! The listener accepts connections and spawns a task for each one,
//! delegating to the connection handler for request processing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::DirectoryBackend;
use crate::config::ListenConfig;
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;

use super::connection::ConnectionHandler;

/// TCP listener that accepts client connections.
pub struct BridgeListener<B: DirectoryBackend + 'static> {
    listen: ListenConfig,
    backend: Arc<B>,
    metrics: Arc<BridgeMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
    next_connection_id: AtomicU64,
}

impl<B: DirectoryBackend + 'static> BridgeListener<B> {
    /// Create a new listener.
    #[must_use]
    pub fn new(listen: ListenConfig, backend: Arc<B>, metrics: Arc<BridgeMetrics>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            listen,
            backend,
            metrics,
            shutdown_tx,
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Get a shutdown handle to signal the listener to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get the current number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the listen address fails.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen.address).await?;
        Ok(listener)
    }

    /// Run the listener, accepting connections until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the listen address fails.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound socket until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address of the socket cannot be read.
    #[instrument(skip(self, listener), fields(address = %self.listen.address))]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "bridge listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => self.accept(socket, addr),
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "connections still open at shutdown");
        }

        Ok(())
    }

    fn accept(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let current = self.active_connections.load(Ordering::Relaxed);

        // Check connection limit
        if current >= self.listen.max_connections {
            warn!(
                peer = %addr,
                active = current,
                max = self.listen.max_connections,
                "connection rejected: limit reached"
            );
            self.metrics.record_rejected_connection();
            // Socket will be dropped, closing the connection
            return;
        }

        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_connections();

        let connection_id = format!(
            "conn-{}",
            self.next_connection_id.fetch_add(1, Ordering::Relaxed)
        );
        debug!(
            peer = %addr,
            connection_id = %connection_id,
            active = current + 1,
            "accepted connection"
        );

        let handler = ConnectionHandler::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.metrics),
            self.shutdown_tx.subscribe(),
            addr,
            connection_id,
        );
        let metrics = Arc::clone(&self.metrics);
        let active_connections = Arc::clone(&self.active_connections);

        tokio::spawn(async move {
            if let Err(e) = handler.handle(socket).await {
                match &e {
                    BridgeError::Shutdown => {
                        debug!(peer = %addr, "connection closed: shutdown");
                    }
                    BridgeError::Connection(io_err)
                        if io_err.kind() == std::io::ErrorKind::UnexpectedEof
                            || io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                    {
                        debug!(peer = %addr, "client disconnected");
                    }
                    BridgeError::ProtocolDecode { .. }
                    | BridgeError::UnsupportedOperation { .. } => {
                        warn!(peer = %addr, error = %e, "connection closed");
                    }
                    _ => {
                        error!(peer = %addr, error = %e, "connection error");
                    }
                }
            }
            active_connections.fetch_sub(1, Ordering::Relaxed);
            metrics.dec_connections();
        });
    }
}
