use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use taskplane_core::{models::TaskStatus, SchedulerError, SchedulerResult};

/// Signal number a stopped task conventionally dies from
const SIGTERM: i32 = 15;

const STOP_OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// What to launch for one task
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl ExecutionRequest {
    /// Split a single argument string on whitespace
    pub fn split_args(args: &str) -> Vec<String> {
        args.split_whitespace().map(str::to_string).collect()
    }
}

/// Final state of a child process, mapped onto task states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: TaskStatus,
    pub return_value: String,
}

/// Runs a task artifact as a child process and waits for it.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    StopRequested,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run the request to completion.
    ///
    /// A message on `stop` kills the child; the outcome is then `Stopped`.
    /// Dropping the sender without sending leaves the child running.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        mut stop: oneshot::Receiver<()>,
    ) -> SchedulerResult<ExecutionOutcome> {
        info!(
            task = %request.task_name,
            program = %request.program.display(),
            args = ?request.args,
            cwd = %request.working_dir.display(),
            "Starting task process"
        );

        let mut child = Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SchedulerError::TaskExecution(format!("failed to spawn task process: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchedulerError::TaskExecution("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SchedulerError::TaskExecution("stderr not captured".to_string()))?;
        let stdout_task = tokio::spawn(read_all(stdout));
        let stderr_task = tokio::spawn(read_all(stderr));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            Ok(()) = &mut stop => Waited::StopRequested,
        };

        let (status, stop_requested) = match waited {
            Waited::Exited(status) => (status?, false),
            Waited::StopRequested => {
                info!(task = %request.task_name, "Killing task process");
                if let Err(e) = child.start_kill() {
                    warn!(task = %request.task_name, error = %e, "Failed to kill task process");
                }
                (child.wait().await?, true)
            }
        };

        let stdout = collect_output(stdout_task, stop_requested).await;
        let stderr = collect_output(stderr_task, stop_requested).await;

        let outcome = classify(status, stop_requested, stdout, stderr);
        info!(
            task = %request.task_name,
            exit = %status,
            outcome = %outcome.status,
            "Task process exited"
        );
        Ok(outcome)
    }
}

async fn read_all<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!(error = %e, "Failed to read task output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// A killed child may leave descendants holding its pipes open, so output
/// collection after a stop is bounded by [`STOP_OUTPUT_GRACE`].
async fn collect_output(handle: JoinHandle<String>, stop_requested: bool) -> String {
    if !stop_requested {
        return handle.await.unwrap_or_default();
    }

    let abort = handle.abort_handle();
    match tokio::time::timeout(STOP_OUTPUT_GRACE, handle).await {
        Ok(output) => output.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Exit 0 finishes with stdout, a stop or SIGTERM stops with stdout, anything
/// else fails with stderr.
pub fn classify(
    status: ExitStatus,
    stop_requested: bool,
    stdout: String,
    stderr: String,
) -> ExecutionOutcome {
    if status.success() {
        ExecutionOutcome {
            status: TaskStatus::Finished,
            return_value: stdout,
        }
    } else if stop_requested || terminated_by(status) == Some(SIGTERM) {
        ExecutionOutcome {
            status: TaskStatus::Stopped,
            return_value: stdout,
        }
    } else {
        ExecutionOutcome {
            status: TaskStatus::Failed,
            return_value: stderr,
        }
    }
}

#[cfg(unix)]
fn terminated_by(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminated_by(_status: ExitStatus) -> Option<i32> {
    None
}
