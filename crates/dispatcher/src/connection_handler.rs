//! 单个worker连接的入站消息处理

use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use taskplane_core::{
    models::TaskStatus,
    protocol::{Message, Received, TaskOutcome},
    Channel, SchedulerError,
};

use crate::scheduler::Scheduler;

pub struct ConnectionHandler {
    scheduler: Arc<Scheduler>,
    channel: Arc<Channel>,
}

impl ConnectionHandler {
    pub fn new(scheduler: Arc<Scheduler>, channel: Arc<Channel>) -> Self {
        Self { scheduler, channel }
    }

    /// 读取消息直到连接结束或通道被关闭，然后将通道移出活动集合
    pub async fn run<R>(self, reader: R)
    where
        R: AsyncRead + Unpin + Send,
    {
        let identity = self.channel.identity().to_string();
        let mut messages = Channel::receive(reader);

        loop {
            tokio::select! {
                _ = self.channel.closed() => {
                    debug!(channel = %identity, "通道已被关闭，停止读取");
                    break;
                }
                received = messages.next_message() => match received {
                    Ok(Received::Message(message)) => self.handle_message(message).await,
                    Ok(Received::Closed) => {
                        info!(channel = %identity, "worker断开连接");
                        break;
                    }
                    Err(e) => {
                        warn!(channel = %identity, error = %e, "读取消息失败");
                        break;
                    }
                },
            }
        }

        self.scheduler.remove_channel(&identity).await;
    }

    pub async fn handle_message(&self, message: Message) {
        let identity = self.channel.identity();
        match message {
            Message::Ping => {
                self.channel.touch_heartbeat();
                if let Err(e) = self.channel.send(&Message::Pong).await {
                    warn!(channel = %identity, error = %e, "回复pong失败");
                    self.channel.close().await;
                }
            }
            Message::TaskRunning(running) => {
                let updated = self
                    .scheduler
                    .registry()
                    .update(&running.task_name, |task| {
                        if task.status != TaskStatus::Running {
                            task.mark_running(identity);
                        }
                    })
                    .await;
                if updated.is_none() {
                    warn!(channel = %identity, task = %running.task_name, "上报的任务不存在");
                } else {
                    info!(channel = %identity, task = %running.task_name, "任务开始运行");
                }
            }
            Message::TaskFinished(outcome) => {
                self.record_outcome(TaskStatus::Finished, outcome).await
            }
            Message::TaskFailed(outcome) => self.record_outcome(TaskStatus::Failed, outcome).await,
            Message::TaskStopped(outcome) => {
                self.record_outcome(TaskStatus::Stopped, outcome).await
            }
            Message::Info(telemetry) => {
                debug!(
                    channel = %identity,
                    cpu = telemetry.cpu,
                    memory = telemetry.memory,
                    "收到worker信息"
                );
                self.channel.record_telemetry(telemetry);
            }
            Message::Unknown { command, .. } => {
                let err = SchedulerError::ProtocolViolation(format!("未知命令: {command}"));
                warn!(channel = %identity, error = %err, "忽略消息");
            }
            other => {
                let err = SchedulerError::ProtocolViolation(format!(
                    "worker不应发送命令: {}",
                    other.command()
                ));
                warn!(channel = %identity, error = %err, "忽略消息");
            }
        }
    }

    async fn record_outcome(&self, status: TaskStatus, outcome: TaskOutcome) {
        let identity = self.channel.identity();
        let TaskOutcome {
            task_name,
            return_value,
        } = outcome;

        let updated = self
            .scheduler
            .registry()
            .update(&task_name, |task| task.mark_outcome(status, Some(return_value)))
            .await;
        match updated {
            Some(()) => info!(channel = %identity, task = %task_name, status = %status, "任务状态已更新"),
            None => warn!(channel = %identity, task = %task_name, "上报的任务已不在注册表中"),
        }

        if !self.channel.release(&task_name) {
            debug!(
                channel = %identity,
                task = %task_name,
                current = ?self.channel.current_task(),
                "上报的任务不是通道当前任务，通道状态不变"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskplane_core::config::DispatcherConfig;
    use taskplane_core::models::{ChannelStatus, Task};
    use taskplane_core::protocol::{read_frame, TaskRunning, WorkerTelemetry};
    use tokio::io::DuplexStream;

    async fn setup() -> (Arc<Scheduler>, ConnectionHandler, Arc<Channel>, DuplexStream) {
        let scheduler = Arc::new(Scheduler::new(DispatcherConfig::default()));
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let channel = Arc::new(Channel::new(
            scheduler.next_identity(),
            "127.0.0.1:1",
            Box::new(local),
        ));
        scheduler.register_channel(channel.clone()).await;
        let handler = ConnectionHandler::new(scheduler.clone(), channel.clone());
        (scheduler, handler, channel, remote)
    }

    fn outcome(task: &str, value: &str) -> TaskOutcome {
        TaskOutcome {
            task_name: task.to_string(),
            return_value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ping_touches_heartbeat_and_replies_pong() {
        let (_scheduler, handler, channel, mut remote) = setup().await;
        let before = channel.last_heartbeat();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handler.handle_message(Message::Ping).await;

        assert!(channel.last_heartbeat() > before);
        assert_eq!(
            read_frame(&mut remote).await.unwrap(),
            Received::Message(Message::Pong)
        );
    }

    #[tokio::test]
    async fn test_outcome_releases_channel() {
        let (scheduler, handler, channel, _remote) = setup().await;
        scheduler.registry().insert(Task::new("t1", "", "json")).await;
        scheduler.schedule_task("t1").await.unwrap();

        handler
            .handle_message(Message::TaskRunning(TaskRunning {
                task_name: "t1".to_string(),
            }))
            .await;
        assert_eq!(channel.status(), ChannelStatus::Busy);

        handler
            .handle_message(Message::TaskFinished(outcome("t1", "42")))
            .await;

        let task = scheduler.registry().get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Finished);
        assert_eq!(task.result.as_deref(), Some("42"));
        assert!(task.assigned_to.is_none());
        assert_eq!(channel.status(), ChannelStatus::Ready);
    }

    #[tokio::test]
    async fn test_report_for_other_task_keeps_channel_busy() {
        let (scheduler, handler, channel, _remote) = setup().await;
        for name in ["t1", "t2"] {
            scheduler.registry().insert(Task::new(name, "", "json")).await;
        }
        scheduler.schedule_task("t1").await.unwrap();

        handler
            .handle_message(Message::TaskFailed(outcome("t2", "worker busy: t1")))
            .await;

        assert_eq!(
            scheduler.registry().get("t2").await.unwrap().status,
            TaskStatus::Failed
        );
        assert_eq!(channel.status(), ChannelStatus::Busy);
        assert_eq!(channel.current_task().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_report_for_deleted_task_still_releases_channel() {
        let (scheduler, handler, channel, _remote) = setup().await;
        scheduler.registry().insert(Task::new("t1", "", "json")).await;
        scheduler.schedule_task("t1").await.unwrap();
        scheduler.registry().remove("t1").await;

        handler
            .handle_message(Message::TaskStopped(outcome("t1", "")))
            .await;
        assert_eq!(channel.status(), ChannelStatus::Ready);
    }

    #[tokio::test]
    async fn test_info_records_telemetry() {
        let (_scheduler, handler, channel, _remote) = setup().await;
        handler
            .handle_message(Message::Info(WorkerTelemetry {
                cpu: 100.0,
                memory: 100.0,
            }))
            .await;
        assert_eq!(
            channel.telemetry(),
            Some(WorkerTelemetry {
                cpu: 100.0,
                memory: 100.0
            })
        );
    }

    #[tokio::test]
    async fn test_peer_close_removes_channel() {
        let (scheduler, handler, channel, _remote) = setup().await;
        let (reader_side, peer) = tokio::io::duplex(1024);
        drop(peer);

        handler.run(reader_side).await;

        assert_eq!(scheduler.channel_count().await, 0);
        assert!(channel.is_closed());
    }
}
