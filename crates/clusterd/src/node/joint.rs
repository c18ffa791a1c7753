//! Runs a group of services as one unit.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::errors::NodeError;
use super::{NODE_TARGET, Service};

/// Time services get to observe cancellation before they are aborted.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How a joint wait ended.
#[derive(Debug)]
pub enum JointOutcome {
    /// Every service returned successfully.
    Completed,
    /// The shutdown token was cancelled.
    Cancelled,
    /// A service lost its connection to the peer.
    Disconnected(NodeError),
    /// A service failed with an unrecoverable error.
    Fatal(NodeError),
}

/// Starts every service concurrently and waits for the group.
///
/// The first failure, or cancellation of `shutdown`, stops the remaining
/// services before returning.
pub async fn joint_wait(
    services: &[Arc<dyn Service>],
    shutdown: &CancellationToken,
) -> JointOutcome {
    let group = shutdown.child_token();
    let mut tasks = JoinSet::new();
    for service in services {
        let service = Arc::clone(service);
        let token = group.clone();
        tasks.spawn(async move {
            let name = service.name();
            debug!(target: NODE_TARGET, service = name, "starting service");
            (name, service.start(token).await)
        });
    }

    let outcome = loop {
        let joined = tokio::select! {
            biased;
            () = shutdown.cancelled() => break JointOutcome::Cancelled,
            joined = tasks.join_next() => joined,
        };
        match joined {
            None => break JointOutcome::Completed,
            Some(Ok((name, Ok(())))) => {
                debug!(target: NODE_TARGET, service = name, "service finished");
            }
            Some(Ok((name, Err(error)))) if error.is_disconnection() => {
                debug!(target: NODE_TARGET, service = name, %error, "service disconnected");
                break JointOutcome::Disconnected(error);
            }
            Some(Ok((_, Err(error)))) => break JointOutcome::Fatal(error),
            Some(Err(error)) => break JointOutcome::Fatal(NodeError::Task(error)),
        }
    };
    group.cancel();
    let drain = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(STOP_GRACE, drain).await.is_err() {
        debug!(target: NODE_TARGET, "services ignored cancellation; aborting");
    }
    tasks.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;

    enum Behaviour {
        Finish,
        Disconnect,
        Fail,
        RunUntilCancelled,
    }

    struct Member {
        behaviour: Behaviour,
        stopped: AtomicBool,
    }

    impl Member {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Service for Member {
        fn name(&self) -> &'static str {
            "member"
        }

        async fn start(&self, shutdown: CancellationToken) -> Result<(), NodeError> {
            match self.behaviour {
                Behaviour::Finish => Ok(()),
                Behaviour::Disconnect => Err(NodeError::Disconnected {
                    peer: "master".to_owned(),
                    reason: "eof".to_owned(),
                }),
                Behaviour::Fail => Err(NodeError::MissingMaster),
                Behaviour::RunUntilCancelled => {
                    shutdown.cancelled().await;
                    self.stopped.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }
        }
    }

    fn group(members: &[Arc<Member>]) -> Vec<Arc<dyn Service>> {
        members
            .iter()
            .map(|member| Arc::clone(member) as Arc<dyn Service>)
            .collect()
    }

    #[tokio::test]
    async fn completes_when_every_service_returns() {
        let members = [Member::new(Behaviour::Finish), Member::new(Behaviour::Finish)];
        let outcome = joint_wait(&group(&members), &CancellationToken::new()).await;
        assert!(matches!(outcome, JointOutcome::Completed));
    }

    #[tokio::test]
    async fn disconnection_stops_the_siblings() {
        let sibling = Member::new(Behaviour::RunUntilCancelled);
        let members = [Member::new(Behaviour::Disconnect), Arc::clone(&sibling)];
        let outcome = joint_wait(&group(&members), &CancellationToken::new()).await;
        assert!(matches!(outcome, JointOutcome::Disconnected(_)));
        assert!(sibling.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn other_errors_are_fatal() {
        let members = [Member::new(Behaviour::Fail), Member::new(Behaviour::RunUntilCancelled)];
        let outcome = joint_wait(&group(&members), &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            JointOutcome::Fatal(NodeError::MissingMaster)
        ));
    }

    #[tokio::test]
    async fn cancellation_unwinds_the_wait() {
        let shutdown = CancellationToken::new();
        let members = [Member::new(Behaviour::RunUntilCancelled)];
        let services = group(&members);
        let waiter = joint_wait(&services, &shutdown);
        shutdown.cancel();
        assert!(matches!(waiter.await, JointOutcome::Cancelled));
    }
}
