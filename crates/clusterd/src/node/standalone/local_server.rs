//! Unix-socket endpoint answering local queries about this node.
//!
//! Each request is one JSON line such as `{"command":"status"}`; each reply
//! is one JSON line. Unknown commands get an `error` reply and the
//! connection stays open. A request longer than [`MAX_REQUEST_BYTES`]
//! closes the connection.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clusterd_config::ClusterMode;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::NodeState;
use crate::context::SupervisorContext;
use crate::node::errors::NodeError;
use crate::node::{NODE_TARGET, NodeArgs, Service};

/// Longest request line accepted, newline included.
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum Request {
    Status,
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Response {
    Status(Status),
    Pong,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
struct Status {
    node: String,
    #[serde(rename = "type")]
    node_type: ClusterMode,
    cluster: String,
    pid: u32,
    workers: Vec<WorkerEntry>,
    master_connected: bool,
    args: HarnessArgs,
}

#[derive(Debug, Clone, Serialize)]
struct WorkerEntry {
    name: String,
    address: String,
}

#[derive(Debug, Clone, Serialize)]
struct HarnessArgs {
    performance_test: Option<i64>,
    concurrency_test: Option<i64>,
    send_string: Option<i64>,
    send_file: Option<String>,
}

impl From<&NodeArgs> for HarnessArgs {
    fn from(args: &NodeArgs) -> Self {
        Self {
            performance_test: args.performance_test,
            concurrency_test: args.concurrency_test,
            send_string: args.send_string,
            send_file: args.send_file.clone(),
        }
    }
}

/// Serves node status on the local Unix socket.
#[derive(Debug)]
pub struct LocalServer {
    path: PathBuf,
    view: Arc<NodeView>,
}

/// What a local client can learn about this node.
#[derive(Debug)]
struct NodeView {
    node: String,
    node_type: ClusterMode,
    cluster: String,
    pid: u32,
    args: HarnessArgs,
    state: Arc<NodeState>,
}

impl LocalServer {
    /// Builds the server for the socket under the cluster state directory.
    #[must_use]
    pub fn new(context: &SupervisorContext, state: Arc<NodeState>) -> Self {
        let cluster = context.cluster();
        Self {
            path: context.paths().local_socket().to_path_buf(),
            view: Arc::new(NodeView {
                node: cluster.node_name.clone(),
                node_type: cluster.node_type,
                cluster: cluster.name.clone(),
                pid: context.own_pid(),
                args: HarnessArgs::from(context.args()),
                state,
            }),
        }
    }
}

impl NodeView {
    fn status(&self) -> Status {
        Status {
            node: self.node.clone(),
            node_type: self.node_type,
            cluster: self.cluster.clone(),
            pid: self.pid,
            workers: self
                .state
                .workers()
                .into_iter()
                .map(|(name, address)| WorkerEntry { name, address })
                .collect(),
            master_connected: self.state.master_connected(),
            args: self.args.clone(),
        }
    }

    fn answer(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(Request::Status) => Response::Status(self.status()),
            Ok(Request::Ping) => Response::Pong,
            Err(error) => Response::Error {
                message: error.to_string(),
            },
        }
    }

    async fn serve(&self, stream: UnixStream, shutdown: CancellationToken) -> io::Result<()> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut line = String::new();
        loop {
            line.clear();
            let mut limited = (&mut reader).take(MAX_REQUEST_BYTES);
            let read = tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                read = limited.read_line(&mut line) => read?,
            };
            if read == 0 {
                return Ok(());
            }
            if !line.ends_with('\n') && limited.limit() == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
                ));
            }
            let request = line.trim();
            if request.is_empty() {
                continue;
            }
            let mut reply = serde_json::to_vec(&self.answer(request))?;
            reply.push(b'\n');
            write.write_all(&reply).await?;
        }
    }
}

#[async_trait]
impl Service for LocalServer {
    fn name(&self) -> &'static str {
        "local_server"
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), NodeError> {
        let listener = bind_local(&self.path)?;
        info!(target: NODE_TARGET, path = %self.path.display(), "local server listening");
        let outcome = loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _)) => {
                    let view = Arc::clone(&self.view);
                    let token = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(error) = view.serve(stream, token).await {
                            debug!(target: NODE_TARGET, %error, "local client dropped");
                        }
                    });
                }
                Err(source) => {
                    break Err(NodeError::Io {
                        component: "local server",
                        source,
                    });
                }
            }
        };
        remove_socket(&self.path);
        outcome
    }
}

fn bind_local(path: &Path) -> Result<UnixListener, NodeError> {
    let failed = |source| NodeError::LocalSocket {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(failed)?;
    }
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(NodeError::NotASocket {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => match StdUnixStream::connect(path) {
            Ok(_live) => {
                return Err(NodeError::SocketInUse {
                    path: path.to_path_buf(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(failed)?;
            }
            Err(error) => return Err(failed(error)),
        },
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(failed(error)),
    }
    UnixListener::bind(path).map_err(failed)
}

fn remove_socket(path: &Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(target: NODE_TARGET, %error, path = %path.display(), "failed to remove local socket");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clusterd_config::Config;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::health::StructuredHealthReporter;

    fn server(dir: &TempDir, state: Arc<NodeState>) -> LocalServer {
        let mut config = Config::default();
        config.runtime.install_dir = dir.path().to_path_buf();
        config.cluster.node_name = "master-node".to_owned();
        let context = SupervisorContext::new(config, Arc::new(StructuredHealthReporter))
            .with_own_pid(4242);
        LocalServer::new(&context, state)
    }

    async fn connect(path: &Path) -> UnixStream {
        for _ in 0..200 {
            if let Ok(stream) = UnixStream::connect(path).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("local server never came up at {}", path.display());
    }

    async fn ask(stream: &mut BufReader<UnixStream>, request: &str) -> serde_json::Value {
        stream
            .get_mut()
            .write_all(format!("{request}\n").as_bytes())
            .await
            .expect("send request");
        let mut line = String::new();
        stream.read_line(&mut line).await.expect("read reply");
        serde_json::from_str(&line).expect("reply is json")
    }

    #[tokio::test]
    async fn answers_status_and_removes_socket_on_shutdown() {
        let dir = TempDir::new().expect("temp dir");
        let state = Arc::new(NodeState::default());
        state.worker_joined("worker-1", "10.0.0.2:40000");
        let server = Arc::new(server(&dir, state));
        let path = server.path.clone();
        assert!(path.ends_with("queue/cluster/c-internal.sock"));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let running = Arc::clone(&server);
            let stop = shutdown.clone();
            async move { running.start(stop).await }
        });

        let mut client = BufReader::new(connect(&path).await);
        let status = ask(&mut client, r#"{"command":"status"}"#).await;
        let field = |pointer: &str| status.pointer(pointer).cloned();
        assert_eq!(field("/kind"), Some(json!("status")));
        assert_eq!(field("/node"), Some(json!("master-node")));
        assert_eq!(field("/type"), Some(json!("master")));
        assert_eq!(field("/pid"), Some(json!(4242)));
        assert_eq!(field("/workers/0/name"), Some(json!("worker-1")));
        assert_eq!(field("/master_connected"), Some(json!(false)));
        let pong = ask(&mut client, r#"{"command":"ping"}"#).await;
        assert_eq!(pong, json!({"kind": "pong"}));
        let error = ask(&mut client, r#"{"command":"reboot"}"#).await;
        assert_eq!(error.get("kind"), Some(&json!("error")));
        drop(client);

        shutdown.cancel();
        task.await.expect("join").expect("server stops cleanly");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).expect("stale socket"));
        assert!(path.exists());
        bind_local(&path).expect("stale socket is reclaimed");
    }

    #[tokio::test]
    async fn live_socket_is_in_use() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("live.sock");
        let _live = UnixListener::bind(&path).expect("live socket");
        assert!(matches!(
            bind_local(&path),
            Err(NodeError::SocketInUse { .. })
        ));
    }

    #[tokio::test]
    async fn regular_file_is_not_a_socket() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("plain");
        fs::write(&path, b"x").expect("write file");
        assert!(matches!(
            bind_local(&path),
            Err(NodeError::NotASocket { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_request_closes_the_connection() {
        let dir = TempDir::new().expect("temp dir");
        let server = Arc::new(server(&dir, Arc::new(NodeState::default())));
        let path = server.path.clone();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let running = Arc::clone(&server);
            let stop = shutdown.clone();
            async move { running.start(stop).await }
        });

        let mut client = BufReader::new(connect(&path).await);
        let pong = ask(&mut client, r#"{"command":"ping"}"#).await;
        assert_eq!(pong, json!({"kind": "pong"}));
        let oversized = usize::try_from(MAX_REQUEST_BYTES).expect("limit fits") + 1;
        let mut request = vec![b' '; oversized];
        request.push(b'\n');
        client.get_mut().write_all(&request).await.ok();
        let mut reply = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), client.read_line(&mut reply))
            .await
            .expect("connection closes promptly")
            .unwrap_or(0);
        assert_eq!(read, 0, "unexpected reply {reply:?}");

        shutdown.cancel();
        task.await.expect("join").expect("server stops cleanly");
    }
}
