use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use taskplane_core::{
    models::TaskStatus,
    protocol::{Message, TaskDispatch, TaskOutcome, TaskRunning},
    SchedulerError, SchedulerResult,
};

use super::DispatcherClient;
use crate::artifact::{latest_artifact_dir, ArtifactClient};
use crate::executors::{ExecutionOutcome, ExecutionRequest, ProcessExecutor};
use crate::sandbox::Sandbox;

struct RunningTask {
    task_name: String,
    stop_tx: Option<oneshot::Sender<()>>,
}

/// Runs at most one task at a time and reports its transitions upstream.
pub struct TaskExecutionManager {
    dispatcher_client: Arc<DispatcherClient>,
    artifacts: ArtifactClient,
    sandbox: Sandbox,
    executor: ProcessExecutor,
    current: Mutex<Option<RunningTask>>,
}

impl TaskExecutionManager {
    pub fn new(
        dispatcher_client: Arc<DispatcherClient>,
        artifacts: ArtifactClient,
        sandbox: Sandbox,
    ) -> Self {
        Self {
            dispatcher_client,
            artifacts,
            sandbox,
            executor: ProcessExecutor::new(),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_task(&self) -> Option<String> {
        self.current().as_ref().map(|running| running.task_name.clone())
    }

    /// Accept a dispatched task and run it in the background.
    ///
    /// A dispatch that arrives while another task runs is answered with
    /// `task-failed` and the running task is left alone.
    pub async fn handle_dispatch(self: &Arc<Self>, dispatch: TaskDispatch) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let busy_with = {
            let mut current = self.current();
            match current.as_ref() {
                Some(running) => Some(running.task_name.clone()),
                None => {
                    *current = Some(RunningTask {
                        task_name: dispatch.task_name.clone(),
                        stop_tx: Some(stop_tx),
                    });
                    None
                }
            }
        };

        if let Some(running) = busy_with {
            let err = SchedulerError::ProtocolViolation(format!(
                "task {} dispatched while {running} is running",
                dispatch.task_name
            ));
            warn!(error = %err, "Rejecting task");
            self.report(
                TaskStatus::Failed,
                &dispatch.task_name,
                format!("worker busy: {running} is still running"),
            )
            .await;
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let task_name = dispatch.task_name.clone();
            let (status, return_value) = manager.run_task(dispatch, stop_rx).await;

            // free the slot first: the dispatcher may redispatch as soon as the report lands
            manager.finish(&task_name);
            manager.report(status, &task_name, return_value).await;
        });
    }

    fn finish(&self, task_name: &str) {
        let mut current = self.current();
        if current.as_ref().map(|r| r.task_name.as_str()) == Some(task_name) {
            *current = None;
        }
    }

    /// Kill the running task, if any. Returns whether a stop was delivered.
    pub fn stop_current(&self) -> bool {
        let stop_tx = self.current().as_mut().and_then(|running| {
            info!(task = %running.task_name, "Stopping task");
            running.stop_tx.take()
        });

        match stop_tx {
            Some(tx) => tx.send(()).is_ok(),
            None => {
                warn!("No task running, nothing to stop");
                false
            }
        }
    }

    /// Download, announce and execute one task. Returns the outcome to report.
    async fn run_task(
        &self,
        dispatch: TaskDispatch,
        stop_rx: oneshot::Receiver<()>,
    ) -> (TaskStatus, String) {
        let TaskDispatch {
            task_name,
            args_to_run,
            return_type,
        } = dispatch;

        info!(task = %task_name, return_type = %return_type, "Received task");

        let artifact = match self.artifacts.download(&task_name).await {
            Ok(path) => path,
            Err(e) => {
                error!(task = %task_name, error = %e, "Artifact download failed");
                return (TaskStatus::Failed, e.to_string());
            }
        };

        if let Err(e) = self
            .dispatcher_client
            .send(&Message::TaskRunning(TaskRunning {
                task_name: task_name.clone(),
            }))
            .await
        {
            warn!(task = %task_name, error = %e, "Failed to report task-running");
        }

        let outcome = match self.prepare(&task_name, &args_to_run, artifact).await {
            Ok(request) => self.executor.execute(&request, stop_rx).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(ExecutionOutcome {
                status,
                return_value,
            }) => (status, return_value),
            Err(e) => {
                error!(task = %task_name, error = %e, "Task execution error");
                (TaskStatus::Failed, e.to_string())
            }
        }
    }

    async fn prepare(
        &self,
        task_name: &str,
        args: &str,
        artifact: PathBuf,
    ) -> SchedulerResult<ExecutionRequest> {
        let working_dir = match latest_artifact_dir(self.sandbox.tasks_dir(), task_name).await? {
            Some(dir) => dir,
            None => artifact
                .parent()
                .map(PathBuf::from)
                .ok_or_else(|| SchedulerError::TaskExecution("artifact has no directory".to_string()))?,
        };

        Ok(ExecutionRequest {
            task_name: task_name.to_string(),
            program: self.sandbox.interpreter().to_path_buf(),
            args: ExecutionRequest::split_args(args),
            working_dir,
        })
    }

    async fn report(&self, status: TaskStatus, task_name: &str, return_value: String) {
        let outcome = TaskOutcome {
            task_name: task_name.to_string(),
            return_value,
        };
        let message = match status {
            TaskStatus::Finished => Message::TaskFinished(outcome),
            TaskStatus::Stopped => Message::TaskStopped(outcome),
            _ => Message::TaskFailed(outcome),
        };

        info!(task = %task_name, command = message.command(), "Reporting task outcome");
        if let Err(e) = self.dispatcher_client.send(&message).await {
            warn!(task = %task_name, error = %e, "Failed to report task outcome");
        }
    }
}
