use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

use taskplane_core::{config::WorkerConfig, BoxedReader, SchedulerError, SchedulerResult};

use crate::artifact::ArtifactClient;
use crate::backoff::Backoff;
use crate::components::{
    DispatcherClient, HeartbeatManager, HeartbeatSchedule, InboundHandler, TaskExecutionManager,
};
use crate::sandbox::Sandbox;

/// Worker agent: one connection to the dispatcher, at most one running task.
pub struct WorkerService {
    config: WorkerConfig,
    sandbox: Sandbox,
    dispatcher_client: Arc<DispatcherClient>,
    executions: Arc<TaskExecutionManager>,
    heartbeat_manager: HeartbeatManager,
    inbound_handler: InboundHandler,
    readers: Mutex<Option<mpsc::UnboundedReceiver<BoxedReader>>>,
}

impl WorkerService {
    pub fn new(config: WorkerConfig) -> Self {
        let sandbox = Sandbox::from_config(&config);
        let (client, readers) = DispatcherClient::new(config.scheduler_address());
        let dispatcher_client = Arc::new(client);

        let executions = Arc::new(TaskExecutionManager::new(
            dispatcher_client.clone(),
            ArtifactClient::new(config.artifact_base_url(), &config.tasks_dir),
            sandbox.clone(),
        ));
        let heartbeat_manager = HeartbeatManager::new(
            dispatcher_client.clone(),
            HeartbeatSchedule {
                heartbeat_delay: Duration::from_millis(config.heartbeat_delay_ms),
                heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
                info_delay: Duration::from_millis(config.info_delay_ms),
                info_interval: Duration::from_millis(config.info_interval_ms),
            },
        );
        let inbound_handler = InboundHandler::new(dispatcher_client.clone(), executions.clone());

        Self {
            config,
            sandbox,
            dispatcher_client,
            executions,
            heartbeat_manager,
            inbound_handler,
            readers: Mutex::new(Some(readers)),
        }
    }

    pub fn dispatcher_client(&self) -> &Arc<DispatcherClient> {
        &self.dispatcher_client
    }

    pub fn current_task(&self) -> Option<String> {
        self.executions.current_task()
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.config.initial_backoff_ms),
            self.config.max_backoff_ms.map(Duration::from_millis),
        )
    }

    /// Provision the sandbox, connect and run all duties.
    ///
    /// Returns `ConnectionLost` when the dispatcher closes the connection and
    /// `Ok(())` on shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        let readers = self
            .readers
            .lock()
            .await
            .take()
            .ok_or_else(|| SchedulerError::Internal("worker service already started".to_string()))?;

        self.sandbox.provision().await?;

        if let Err(e) = self.dispatcher_client.connect().await {
            warn!(error = %e, "Initial connect failed");
            self.dispatcher_client.request_reconnect();
        }

        let handler_delay = Duration::from_millis(self.config.handler_delay_ms);
        let inbound = async {
            tokio::time::sleep(handler_delay).await;
            self.inbound_handler.run(readers).await
        };

        let result = tokio::select! {
            result = inbound => result,
            _ = self.heartbeat_manager.run_heartbeat() => Ok(()),
            _ = self.heartbeat_manager.run_info() => Ok(()),
            _ = self.dispatcher_client.reconnect_loop(self.backoff()) => Ok(()),
            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping worker");
                Ok(())
            }
        };

        if self.executions.current_task().is_some() {
            self.executions.stop_current();
        }
        self.dispatcher_client.close().await;
        result
    }
}
