use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::NodeState;
use super::protocol::{Frame, read_frame, write_frame};
use crate::context::SupervisorContext;
use crate::node::errors::NodeError;
use crate::node::{ControlLoop, NODE_TARGET, Service, TaskPool};

/// Accepts worker connections and keeps the roster of live workers.
#[derive(Debug)]
pub struct MasterLoop {
    address: String,
    node_name: String,
    cluster_name: String,
    key: String,
    silence_limit: Duration,
    state: Arc<NodeState>,
    pool: Option<Arc<dyn TaskPool>>,
}

impl MasterLoop {
    /// Builds the loop from the node configuration.
    #[must_use]
    pub fn new(
        context: &SupervisorContext,
        state: Arc<NodeState>,
        pool: Option<Arc<dyn TaskPool>>,
    ) -> Self {
        let cluster = context.cluster();
        let intervals = &context.items().intervals.master;
        Self {
            address: format!("{}:{}", cluster.bind_addr, cluster.port),
            node_name: cluster.node_name.clone(),
            cluster_name: cluster.name.clone(),
            key: cluster.key.clone(),
            silence_limit: Duration::from_secs(intervals.max_allowed_time_without_keepalive),
            state,
            pool,
        }
    }

    async fn bind(&self) -> Result<TcpListener, NodeError> {
        TcpListener::bind(&self.address)
            .await
            .map_err(|source| NodeError::Listen {
                address: self.address.clone(),
                source,
            })
    }

    fn session(&self) -> Session {
        Session {
            master: self.node_name.clone(),
            cluster: self.cluster_name.clone(),
            key: self.key.clone(),
            silence_limit: self.silence_limit,
            state: Arc::clone(&self.state),
        }
    }

    /// Accepts workers on an already bound listener until cancelled.
    pub(super) async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), NodeError> {
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let session = self.session();
                    let token = shutdown.child_token();
                    tokio::spawn(async move { session.serve(stream, peer, token).await });
                }
                Err(error) => {
                    warn!(target: NODE_TARGET, %error, "failed to accept worker connection");
                }
            }
        }
    }
}

#[async_trait]
impl Service for MasterLoop {
    fn name(&self) -> &'static str {
        "master"
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), NodeError> {
        let listener = self.bind().await?;
        info!(target: NODE_TARGET, address = %self.address, "listening for workers");
        self.serve(listener, shutdown).await
    }
}

impl ControlLoop for MasterLoop {
    fn task_pool(&self) -> Option<Arc<dyn TaskPool>> {
        self.pool.clone()
    }
}

/// One worker connection.
struct Session {
    master: String,
    cluster: String,
    key: String,
    silence_limit: Duration,
    state: Arc<NodeState>,
}

impl Session {
    async fn serve(self, stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        let Some(node) = self.handshake(&mut reader, &mut write, peer).await else {
            return;
        };
        self.state.worker_joined(&node, &peer.to_string());
        info!(target: NODE_TARGET, worker = %node, %peer, "worker connected");

        loop {
            let frame = tokio::select! {
                () = shutdown.cancelled() => break,
                frame = tokio::time::timeout(self.silence_limit, read_frame(&mut reader)) => frame,
            };
            match frame {
                Ok(Ok(Some(Frame::KeepAlive))) => {
                    debug!(target: NODE_TARGET, worker = %node, "keep-alive");
                }
                Ok(Ok(Some(Frame::Echo { payload }))) => {
                    let ack = Frame::Ack {
                        bytes: payload.len(),
                    };
                    if let Err(error) = write_frame(&mut write, &ack).await {
                        debug!(target: NODE_TARGET, worker = %node, %error, "reply failed");
                        break;
                    }
                }
                Ok(Ok(Some(other))) => {
                    debug!(target: NODE_TARGET, worker = %node, ?other, "unexpected frame");
                }
                Ok(Ok(None)) => {
                    info!(target: NODE_TARGET, worker = %node, "worker disconnected");
                    break;
                }
                Ok(Err(error)) => {
                    warn!(target: NODE_TARGET, worker = %node, %error, "dropping worker");
                    break;
                }
                Err(_) => {
                    warn!(
                        target: NODE_TARGET,
                        worker = %node,
                        silence_secs = self.silence_limit.as_secs(),
                        "worker stopped sending keep-alives; dropping"
                    );
                    break;
                }
            }
        }
        self.state.worker_left(&node);
    }

    async fn handshake<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        peer: SocketAddr,
    ) -> Option<String>
    where
        R: tokio::io::AsyncBufRead + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        let hello = tokio::time::timeout(self.silence_limit, read_frame(reader)).await;
        let (node, cluster, key) = match hello {
            Ok(Ok(Some(Frame::Hello { node, cluster, key }))) => (node, cluster, key),
            _ => {
                debug!(target: NODE_TARGET, %peer, "connection closed before handshake");
                return None;
            }
        };
        let reply = if cluster != self.cluster {
            Frame::Rejected {
                reason: format!("unknown cluster '{cluster}'"),
            }
        } else if key != self.key {
            Frame::Rejected {
                reason: "invalid cluster key".to_owned(),
            }
        } else {
            Frame::Welcome {
                master: self.master.clone(),
            }
        };
        let accepted = matches!(reply, Frame::Welcome { .. });
        if let Err(error) = write_frame(writer, &reply).await {
            debug!(target: NODE_TARGET, %peer, %error, "handshake reply failed");
            return None;
        }
        if accepted {
            Some(node)
        } else {
            warn!(target: NODE_TARGET, worker = %node, %peer, "rejected worker");
            None
        }
    }
}
