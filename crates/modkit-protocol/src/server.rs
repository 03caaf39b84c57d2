// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC server helpers for connection endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use prost_types::Any;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, instrument, warn};

use crate::proto::connection_service_server::{ConnectionService, ConnectionServiceServer};

/// Errors that can occur in the connection server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// An incoming call handed to the acceptor.
pub struct AcceptedCall {
    pub remote_addr: Option<SocketAddr>,
    /// Envelopes sent by the peer; `None` for `Publications` calls
    pub inbound: Option<Streaming<Any>>,
    /// Envelopes for the peer; dropping every sender ends the call
    pub outbound: mpsc::Sender<Result<Any, Status>>,
}

/// Receives every call arriving at a [`ConnectionEndpoint`].
///
/// Runs on a runtime thread and must not block.
pub trait CallAcceptor: Send + Sync + 'static {
    fn accept(&self, call: AcceptedCall) -> Result<(), Status>;
}

/// Service implementation forwarding each call to an acceptor.
pub struct ConnectionEndpoint {
    acceptor: Arc<dyn CallAcceptor>,
    capacity: usize,
}

impl ConnectionEndpoint {
    pub fn new(acceptor: Arc<dyn CallAcceptor>, capacity: usize) -> Self {
        Self {
            acceptor,
            capacity: capacity.max(1),
        }
    }

    fn hand_over(
        &self,
        remote_addr: Option<SocketAddr>,
        inbound: Option<Streaming<Any>>,
    ) -> Result<ReceiverStream<Result<Any, Status>>, Status> {
        let (outbound, rx) = mpsc::channel(self.capacity);
        self.acceptor.accept(AcceptedCall {
            remote_addr,
            inbound,
            outbound,
        })?;
        Ok(ReceiverStream::new(rx))
    }
}

#[tonic::async_trait]
impl ConnectionService for ConnectionEndpoint {
    type ConnectStream = ReceiverStream<Result<Any, Status>>;
    type PublicationsStream = ReceiverStream<Result<Any, Status>>;

    async fn connect_stream(
        &self,
        request: Request<Streaming<Any>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let remote_addr = request.remote_addr();
        debug!(remote = ?remote_addr, "Accepted session");
        let stream = self.hand_over(remote_addr, Some(request.into_inner()))?;
        Ok(Response::new(stream))
    }

    async fn publications(
        &self,
        request: Request<Any>,
    ) -> Result<Response<Self::PublicationsStream>, Status> {
        let remote_addr = request.remote_addr();
        debug!(remote = ?remote_addr, "Accepted subscription");
        let stream = self.hand_over(remote_addr, None)?;
        Ok(Response::new(stream))
    }
}

/// Serve `endpoint` on `listener` until `shutdown` is cancelled.
///
/// Calls still open `grace` after cancellation are abandoned.
#[instrument(skip_all)]
pub async fn serve(
    listener: TcpListener,
    endpoint: ConnectionEndpoint,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Connection server listening");

    let token = shutdown.clone();
    let server = Server::builder()
        .add_service(ConnectionServiceServer::new(endpoint))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            token.cancelled().await
        });
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            info!(addr = %addr, "Connection server stopped");
            Ok(result?)
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(addr = %addr, grace_ms = grace.as_millis() as u64, "Open calls outlived shutdown grace, abandoning them");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refuse;

    impl CallAcceptor for Refuse {
        fn accept(&self, _call: AcceptedCall) -> Result<(), Status> {
            Err(Status::unavailable("shutting down"))
        }
    }

    #[tokio::test]
    async fn test_refused_call_surfaces_status() {
        let endpoint = ConnectionEndpoint::new(Arc::new(Refuse), 4);
        let result = endpoint.publications(Request::new(Any::default())).await;
        let status = result.err().unwrap();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let endpoint = ConnectionEndpoint::new(Arc::new(Refuse), 0);
        assert_eq!(endpoint.capacity, 1);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(
            listener,
            ConnectionEndpoint::new(Arc::new(Refuse), 4),
            shutdown.clone(),
            Duration::from_millis(100),
        ));

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
