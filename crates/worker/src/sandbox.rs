//! Isolated runtime used to launch task artifacts.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use taskplane_core::{config::WorkerConfig, SchedulerError, SchedulerResult};

#[derive(Debug, Clone)]
pub struct Sandbox {
    init_command: Vec<String>,
    tasks_dir: PathBuf,
    interpreter: PathBuf,
}

impl Sandbox {
    pub fn new(init_command: Vec<String>, tasks_dir: impl Into<PathBuf>, interpreter: &str) -> Self {
        let tasks_dir = tasks_dir.into();
        let interpreter = tasks_dir.join(interpreter);
        Self {
            init_command,
            tasks_dir,
            interpreter,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.sandbox_init_command.clone(),
            &config.tasks_dir,
            &config.interpreter,
        )
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    /// Interpreter every artifact is launched with
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run the init command once. An empty command only creates the tasks directory.
    pub async fn provision(&self) -> SchedulerResult<()> {
        tokio::fs::create_dir_all(&self.tasks_dir).await?;

        let Some((program, args)) = self.init_command.split_first() else {
            info!("No sandbox init command configured");
            return Ok(());
        };

        info!(command = ?self.init_command, "Creating sandbox");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                SchedulerError::Configuration(format!("failed to run sandbox init command: {e}"))
            })?;

        if !output.status.success() {
            return Err(SchedulerError::Configuration(format!(
                "sandbox init command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(interpreter = %self.interpreter.display(), "Sandbox created");
        Ok(())
    }
}
