use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use taskplane_core::protocol::{Message, WorkerTelemetry};

use super::DispatcherClient;

/// Telemetry reported by the info sender. Real sampling is not wired in yet.
pub const STUB_TELEMETRY: WorkerTelemetry = WorkerTelemetry {
    cpu: 100.0,
    memory: 100.0,
};

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSchedule {
    pub heartbeat_delay: Duration,
    pub heartbeat_interval: Duration,
    pub info_delay: Duration,
    pub info_interval: Duration,
}

pub struct HeartbeatManager {
    dispatcher_client: Arc<DispatcherClient>,
    schedule: HeartbeatSchedule,
}

impl HeartbeatManager {
    pub fn new(dispatcher_client: Arc<DispatcherClient>, schedule: HeartbeatSchedule) -> Self {
        Self {
            dispatcher_client,
            schedule,
        }
    }

    /// Send `ping` after the initial delay, then on every interval tick
    pub async fn run_heartbeat(&self) {
        self.run_periodic(
            self.schedule.heartbeat_delay,
            self.schedule.heartbeat_interval,
            || Message::Ping,
        )
        .await
    }

    /// Send `info` after the initial delay, then on every interval tick
    pub async fn run_info(&self) {
        self.run_periodic(
            self.schedule.info_delay,
            self.schedule.info_interval,
            || Message::Info(STUB_TELEMETRY),
        )
        .await
    }

    async fn run_periodic<F>(&self, delay: Duration, period: Duration, make: F)
    where
        F: Fn() -> Message,
    {
        let mut ticker = interval_at(Instant::now() + delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let message = make();
            match self.dispatcher_client.send(&message).await {
                Ok(()) => debug!(command = message.command(), "Sent to dispatcher"),
                Err(e) => warn!(command = message.command(), error = %e, "Failed to send to dispatcher"),
            }
        }
    }
}
