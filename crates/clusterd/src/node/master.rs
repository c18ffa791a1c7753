use std::sync::Arc;

use super::controller::{ModeController, warm_pool};
use super::errors::NodeError;
use super::joint::{JointOutcome, joint_wait};
use super::Service;

impl ModeController<'_> {
    /// Runs the master control loop, the local server, and the helper when
    /// it is enabled.
    pub async fn master_main(&self) -> Result<(), NodeError> {
        let control = self.factory.master(self.context)?;
        let mut services: Vec<Arc<dyn Service>> = vec![
            Arc::clone(&control) as Arc<dyn Service>,
            self.factory.local_server(self.context)?,
        ];
        if self.context.cluster().helper_enabled() {
            services.push(self.factory.helper(self.context)?);
        }
        warm_pool(control.as_ref())?;
        match joint_wait(&services, &self.shutdown).await {
            JointOutcome::Completed | JointOutcome::Cancelled => Ok(()),
            JointOutcome::Disconnected(error) | JointOutcome::Fatal(error) => Err(error),
        }
    }
}
