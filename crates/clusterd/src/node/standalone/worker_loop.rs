use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::NodeState;
use super::protocol::{Frame, read_frame, write_frame};
use crate::context::SupervisorContext;
use crate::node::errors::NodeError;
use crate::node::{
    ControlLoop, MAX_HARNESS_PAYLOAD_BYTES, NODE_TARGET, NodeArgs, Service, TaskPool,
};

/// Maintains the connection from this worker to the master.
#[derive(Debug)]
pub struct WorkerLoop {
    master: String,
    node_name: String,
    cluster_name: String,
    key: String,
    keep_alive: Duration,
    args: NodeArgs,
    state: Arc<NodeState>,
    pool: Option<Arc<dyn TaskPool>>,
}

impl WorkerLoop {
    /// Builds the loop for the master at `master`.
    #[must_use]
    pub fn new(
        context: &SupervisorContext,
        master: &str,
        state: Arc<NodeState>,
        pool: Option<Arc<dyn TaskPool>>,
    ) -> Self {
        let cluster = context.cluster();
        Self {
            master: format!("{master}:{}", cluster.port),
            node_name: cluster.node_name.clone(),
            cluster_name: cluster.name.clone(),
            key: cluster.key.clone(),
            keep_alive: Duration::from_secs(
                context.items().intervals.worker.keep_alive.max(1),
            ),
            args: context.args().clone(),
            state,
            pool,
        }
    }

    fn disconnected(&self, reason: &dyn fmt::Display) -> NodeError {
        NodeError::Disconnected {
            peer: self.master.clone(),
            reason: reason.to_string(),
        }
    }

    /// Frames requested by the harness flags, sent once after joining.
    fn harness_frames(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if let Some(size) = self.args.performance_test {
            frames.push(filler(size));
        }
        if let Some(count) = self.args.concurrency_test {
            let count = usize::try_from(count).unwrap_or_default();
            frames.extend((0..count).map(|index| Frame::Echo {
                payload: format!("concurrency-{index}"),
            }));
        }
        if let Some(size) = self.args.send_string {
            frames.push(filler(size));
        }
        if let Some(path) = &self.args.send_file {
            match fs::read(path) {
                Ok(bytes) if exceeds_payload_limit(bytes.len()) => {
                    warn!(target: NODE_TARGET, %path, size = bytes.len(), "test file too large to send");
                }
                Ok(bytes) => frames.push(Frame::Echo {
                    payload: String::from_utf8_lossy(&bytes).into_owned(),
                }),
                Err(error) => warn!(target: NODE_TARGET, %path, %error, "cannot read test file"),
            }
        }
        frames
    }

    async fn join<W>(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut W,
    ) -> Result<(), NodeError>
    where
        W: AsyncWrite + Unpin,
    {
        let hello = Frame::Hello {
            node: self.node_name.clone(),
            cluster: self.cluster_name.clone(),
            key: self.key.clone(),
        };
        write_frame(writer, &hello)
            .await
            .map_err(|error| self.disconnected(&error))?;
        match read_frame(reader).await {
            Ok(Some(Frame::Welcome { master })) => {
                info!(target: NODE_TARGET, %master, "joined cluster");
                Ok(())
            }
            Ok(Some(Frame::Rejected { reason })) => Err(self.disconnected(&reason)),
            Ok(Some(other)) => Err(self.disconnected(&format!("unexpected reply {other:?}"))),
            Ok(None) => Err(self.disconnected(&"closed during handshake")),
            Err(error) => Err(self.disconnected(&error)),
        }
    }

    async fn session(
        &self,
        stream: TcpStream,
        shutdown: &CancellationToken,
    ) -> Result<(), NodeError> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        self.join(&mut reader, &mut write).await?;
        self.state.set_master_connected(true);

        for frame in self.harness_frames() {
            write_frame(&mut write, &frame)
                .await
                .map_err(|error| self.disconnected(&error))?;
        }

        let (frames, mut incoming) = mpsc::channel(16);
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = read_frame(&mut reader).await;
                let more = matches!(frame, Ok(Some(_)));
                if frames.send(frame).await.is_err() || !more {
                    break;
                }
            }
        });

        let mut ticker = tokio::time::interval(self.keep_alive);
        ticker.tick().await;
        let outcome = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                _ = ticker.tick() => {
                    if let Err(error) = write_frame(&mut write, &Frame::KeepAlive).await {
                        break Err(self.disconnected(&error));
                    }
                }
                frame = incoming.recv() => match frame {
                    Some(Ok(Some(Frame::Ack { bytes }))) => {
                        info!(target: NODE_TARGET, bytes, "master acknowledged payload");
                    }
                    Some(Ok(Some(other))) => {
                        debug!(target: NODE_TARGET, ?other, "unexpected frame from master");
                    }
                    Some(Ok(None)) | None => break Err(self.disconnected(&"closed by master")),
                    Some(Err(error)) => break Err(self.disconnected(&error)),
                },
            }
        };
        reader_task.abort();
        outcome
    }
}

fn exceeds_payload_limit(len: usize) -> bool {
    !i64::try_from(len).is_ok_and(|len| len <= MAX_HARNESS_PAYLOAD_BYTES)
}

fn filler(size: i64) -> Frame {
    let size = usize::try_from(size).unwrap_or_default();
    Frame::Echo {
        payload: "a".repeat(size),
    }
}

#[async_trait]
impl Service for WorkerLoop {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), NodeError> {
        let stream = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            stream = TcpStream::connect(&self.master) => {
                stream.map_err(|error| self.disconnected(&error))?
            }
        };
        let outcome = self.session(stream, &shutdown).await;
        self.state.set_master_connected(false);
        outcome
    }
}

impl ControlLoop for WorkerLoop {
    fn task_pool(&self) -> Option<Arc<dyn TaskPool>> {
        self.pool.clone()
    }
}
