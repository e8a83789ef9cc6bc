//! Per-connection request handler.
//!
//! Manages a single client connection: decodes LDAP messages, dispatches
//! them to the [`DirectoryBackend`] and writes the responses.
//!
//! # Session Handling
//!
//! The handler asks the backend for a session when the connection opens and
//! keeps it for the lifetime of the connection. Every operation sees that
//! same session. It is handed back to the backend on unbind, EOF, protocol
//! error or shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::backend::DirectoryBackend;
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;

use super::codec::LdapCodec;
use super::message::{
    ExtendedResponse, LdapMessage, LdapOp, LdapResponse, LdapResult, ResponseFrame, ResultCode,
    PASSWORD_MODIFY_OID, WHOAMI_OID,
};

/// Whether to keep reading after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Handles requests for a single client connection.
pub struct ConnectionHandler<B: DirectoryBackend> {
    backend: Arc<B>,
    metrics: Arc<BridgeMetrics>,
    shutdown_rx: broadcast::Receiver<()>,
    client_address: SocketAddr,
    connection_id: String,
    session: Option<B::Session>,
}

impl<B: DirectoryBackend> ConnectionHandler<B> {
    /// Create a new connection handler.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        metrics: Arc<BridgeMetrics>,
        shutdown_rx: broadcast::Receiver<()>,
        client_address: SocketAddr,
        connection_id: String,
    ) -> Self {
        Self {
            backend,
            metrics,
            shutdown_rx,
            client_address,
            connection_id,
            session: None,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Handle the connection, processing requests until unbind, disconnect
    /// or shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if no session could be created, on a protocol error,
    /// an unsupported operation, a connection failure or shutdown.
    #[instrument(skip(self, stream), fields(
        peer = %self.client_address,
        connection_id = %self.connection_id
    ))]
    pub async fn handle<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let session = self
            .backend
            .connect(self.client_address, self.connection_id.clone())
            .map_err(|e| {
                warn!(error = %e, "could not create session");
                BridgeError::Auth(e)
            })?;
        self.session = Some(session);
        info!("client connected");

        let mut framed = Framed::new(stream, LdapCodec::new());
        let result = self.serve(&mut framed).await;

        if let Some(session) = self.session.take() {
            self.backend.disconnect(session);
        }
        result
    }

    async fn serve<S>(&mut self, framed: &mut Framed<S, LdapCodec>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            tokio::select! {
                result = framed.next() => {
                    match result {
                        Some(Ok(message)) => {
                            debug!(
                                message_id = message.message_id,
                                operation = message.op.name(),
                                "received request"
                            );
                            if self.dispatch(message, framed).await? == Flow::Close {
                                debug!("client unbound");
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "protocol decode error");
                            self.metrics.record_protocol_error();
                            let notice = ResponseFrame::notice_of_disconnection(
                                ResultCode::ProtocolError,
                                e.to_string(),
                            );
                            let _ = framed.send(notice).await;
                            return Err(BridgeError::ProtocolDecode {
                                message: e.to_string(),
                            });
                        }
                        None => {
                            debug!("client disconnected");
                            return Ok(());
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    debug!("shutdown during connection handling");
                    let notice = ResponseFrame::notice_of_disconnection(
                        ResultCode::Unavailable,
                        "server is shutting down",
                    );
                    let _ = framed.send(notice).await;
                    return Err(BridgeError::Shutdown);
                }
            }
        }
    }

    /// Dispatch one message and write its responses.
    async fn dispatch<S>(
        &mut self,
        message: LdapMessage,
        framed: &mut Framed<S, LdapCodec>,
    ) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let operation = message.op.name();
        let id = message.message_id;

        let flow = match message.op {
            LdapOp::Bind(mut request) => {
                let result = self
                    .backend
                    .bind(self.session.as_mut(), &mut request)
                    .await;
                framed
                    .send(ResponseFrame::new(id, LdapResponse::Bind(result)))
                    .await?;
                Flow::Continue
            }
            LdapOp::Unbind => Flow::Close,
            LdapOp::Search(request) => {
                let results = self.backend.search(self.session.as_ref(), &request).await;
                for entry in results.entries {
                    framed
                        .feed(ResponseFrame::new(id, LdapResponse::SearchEntry(entry)))
                        .await?;
                }
                framed
                    .send(ResponseFrame::new(id, LdapResponse::SearchDone(results.done)))
                    .await?;
                Flow::Continue
            }
            LdapOp::Modify(request) => {
                let result = self.backend.modify(self.session.as_ref(), &request).await;
                framed
                    .send(ResponseFrame::new(id, LdapResponse::Modify(result)))
                    .await?;
                Flow::Continue
            }
            LdapOp::Add(request) => {
                let result = self.backend.add(self.session.as_ref(), &request).await;
                framed
                    .send(ResponseFrame::new(id, LdapResponse::Add(result)))
                    .await?;
                Flow::Continue
            }
            LdapOp::Delete(request) => {
                let result = self.backend.delete(self.session.as_ref(), &request).await;
                framed
                    .send(ResponseFrame::new(id, LdapResponse::Delete(result)))
                    .await?;
                Flow::Continue
            }
            LdapOp::ModifyDn(request) => {
                let result = self.backend.modify_dn(self.session.as_ref(), &request).await;
                framed
                    .send(ResponseFrame::new(id, LdapResponse::ModifyDn(result)))
                    .await?;
                Flow::Continue
            }
            LdapOp::Abandon(target) => {
                // Every operation completes before the next is read.
                debug!(target, "ignoring abandon request");
                Flow::Continue
            }
            LdapOp::Extended(request) => {
                let session = self.session.as_ref();
                let response = match request.name.as_str() {
                    PASSWORD_MODIFY_OID => match request.password_modify() {
                        Ok(pm) => self.backend.password_modify(session, &pm).await,
                        Err(e) => ExtendedResponse::from_result(LdapResult::new(
                            ResultCode::ProtocolError,
                            e.to_string(),
                        )),
                    },
                    WHOAMI_OID => self.backend.whoami(session).await,
                    _ => self.backend.extended(session, &request).await,
                };
                framed
                    .send(ResponseFrame::new(id, LdapResponse::Extended(response)))
                    .await?;
                Flow::Continue
            }
            LdapOp::Unsupported { tag } => {
                warn!(message_id = id, tag, "unsupported operation, closing connection");
                let notice = ResponseFrame::notice_of_disconnection(
                    ResultCode::ProtocolError,
                    format!("unsupported operation (application tag {tag})"),
                );
                let _ = framed.send(notice).await;
                return Err(BridgeError::UnsupportedOperation { tag });
            }
        };

        self.metrics
            .record_operation(operation, started.elapsed().as_secs_f64());
        Ok(flow)
    }
}
