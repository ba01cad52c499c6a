use async_trait::async_trait;
use tracing::debug;

use taskplane_core::{
    models::{ChannelInfo, ChannelStatus, Task},
    SchedulerResult,
};

/// 任务派发策略
///
/// `available_workers` 按通道注册顺序排列。策略只负责挑选候选通道，
/// 真正的占用由调度器在通道上原子提交。
#[async_trait]
pub trait TaskDispatchStrategy: Send + Sync {
    async fn select_worker(
        &self,
        task: &Task,
        available_workers: &[ChannelInfo],
    ) -> SchedulerResult<Option<String>>;

    fn name(&self) -> &str;
}

/// 按注册顺序选择第一个空闲通道
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstReadyStrategy;

impl FirstReadyStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskDispatchStrategy for FirstReadyStrategy {
    async fn select_worker(
        &self,
        task: &Task,
        available_workers: &[ChannelInfo],
    ) -> SchedulerResult<Option<String>> {
        let selected = available_workers
            .iter()
            .find(|worker| worker.status == ChannelStatus::Ready);

        match selected {
            Some(worker) => {
                debug!(task = %task.name, channel = %worker.identity, "FIFO策略选择通道");
                Ok(Some(worker.identity.clone()))
            }
            None => {
                debug!(task = %task.name, "没有空闲的通道");
                Ok(None)
            }
        }
    }

    fn name(&self) -> &str {
        "FirstReady"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn worker(identity: &str, status: ChannelStatus) -> ChannelInfo {
        ChannelInfo {
            identity: identity.to_string(),
            remote_address: "127.0.0.1:1".to_string(),
            status,
            current_task: None,
            telemetry: None,
            connected_at: Utc::now(),
            heartbeat_age_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_picks_earliest_ready_worker() {
        let strategy = FirstReadyStrategy::new();
        let task = Task::new("t", "", "json");
        let workers = vec![
            worker("client 1", ChannelStatus::Busy),
            worker("client 2", ChannelStatus::Ready),
            worker("client 3", ChannelStatus::Ready),
        ];

        let selected = strategy.select_worker(&task, &workers).await.unwrap();
        assert_eq!(selected.as_deref(), Some("client 2"));
        assert_eq!(strategy.name(), "FirstReady");
    }

    #[tokio::test]
    async fn test_no_ready_worker() {
        let strategy = FirstReadyStrategy::new();
        let task = Task::new("t", "", "json");

        assert!(strategy.select_worker(&task, &[]).await.unwrap().is_none());

        let workers = vec![
            worker("client 1", ChannelStatus::Busy),
            worker("client 2", ChannelStatus::Stopped),
        ];
        assert!(strategy.select_worker(&task, &workers).await.unwrap().is_none());
    }
}
