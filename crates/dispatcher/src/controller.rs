use std::sync::Arc;

use tracing::{debug, info, warn};

use taskplane_core::{
    models::{ChannelInfo, ControlResponse, Task, TaskStatus, TASK_ALREADY_EXISTS},
    protocol::Message,
    SchedulerError,
};

use crate::scheduler::{DispatchOutcome, Scheduler};

/// 任务控制操作
///
/// 所有操作都返回 [`ControlResponse`]，调用方根据 `status` 分支处理。
#[derive(Clone)]
pub struct TaskController {
    scheduler: Arc<Scheduler>,
}

impl TaskController {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// 创建处于 `created` 状态的任务，由派发扫描择机派发
    pub async fn create_task(&self, name: &str, args: &str, return_type: &str) -> ControlResponse {
        if name.trim().is_empty() {
            return ControlResponse::error("task name must not be empty");
        }

        if self
            .scheduler
            .registry()
            .insert(Task::new(name, args, return_type))
            .await
        {
            info!(task = %name, "任务已创建");
            ControlResponse::ok()
        } else {
            ControlResponse::error(TASK_ALREADY_EXISTS)
        }
    }

    /// 向执行任务的通道发送 `stop-task`
    ///
    /// 任务状态在worker上报 `task-stopped` 后才会变化。任务未分配通道，
    /// 或所在通道已不存在时，与任务不存在同样返回 `task not found`。
    pub async fn stop_task(&self, name: &str) -> ControlResponse {
        let Some(task) = self.scheduler.registry().get(name).await else {
            return ControlResponse::task_not_found();
        };

        let Some(identity) = task.assigned_to else {
            debug!(task = %name, status = %task.status, "任务未分配通道，无法停止");
            return ControlResponse::task_not_found();
        };

        let Some(channel) = self.scheduler.find_channel(&identity).await else {
            warn!(task = %name, channel = %identity, "任务所在通道已不存在");
            return ControlResponse::task_not_found();
        };

        if let Err(e) = channel.send(&Message::StopTask).await {
            warn!(task = %name, channel = %identity, error = %e, "发送停止消息失败");
            self.scheduler.remove_channel(&identity).await;
        } else {
            info!(task = %name, channel = %identity, "已请求停止任务");
        }

        ControlResponse::ok()
    }

    /// 停止并删除任务，重复调用时返回 `task not found`
    pub async fn delete_task(&self, name: &str) -> ControlResponse {
        let _ = self.stop_task(name).await;

        match self.scheduler.registry().remove(name).await {
            Some(_) => {
                info!(task = %name, "任务已删除");
                ControlResponse::ok()
            }
            None => ControlResponse::task_not_found(),
        }
    }

    /// 重新派发一个已停止的任务
    pub async fn start_task(&self, name: &str) -> ControlResponse {
        let Some(task) = self.scheduler.registry().get(name).await else {
            return ControlResponse::task_not_found();
        };

        if task.status != TaskStatus::Stopped {
            let err = SchedulerError::InvalidTaskState {
                name: name.to_string(),
                status: task.status.to_string(),
            };
            debug!(task = %name, error = %err, "拒绝启动任务");
            return ControlResponse::error(err.to_string());
        }

        match self.scheduler.schedule_task(name).await {
            Ok(DispatchOutcome::Dispatched { channel }) => {
                info!(task = %name, channel = %channel, "任务已重新派发");
            }
            Ok(outcome) => {
                warn!(task = %name, outcome = ?outcome, "任务未能重新派发，保持停止状态");
            }
            Err(e) => {
                warn!(task = %name, error = %e, "重新派发任务时出错");
            }
        }

        ControlResponse::ok()
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.scheduler.registry().snapshot().await
    }

    pub async fn get_task(&self, name: &str) -> Option<Task> {
        self.scheduler.registry().get(name).await
    }

    pub async fn list_workers(&self) -> Vec<ChannelInfo> {
        self.scheduler.channel_infos().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskplane_core::config::DispatcherConfig;
    use taskplane_core::models::{ControlStatus, TASK_NOT_FOUND};

    fn controller() -> TaskController {
        TaskController::new(Arc::new(Scheduler::new(DispatcherConfig::default())))
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let controller = controller();
        assert!(controller.create_task("t1", "", "json").await.is_ok());

        let response = controller.create_task("t1", "", "json").await;
        assert_eq!(response.status, ControlStatus::Error);
        assert_eq!(response.message.as_deref(), Some(TASK_ALREADY_EXISTS));

        assert!(!controller.create_task("  ", "", "json").await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_missing_task() {
        let controller = controller();
        assert_eq!(
            controller.stop_task("missing").await,
            ControlResponse::error(TASK_NOT_FOUND)
        );
        assert!(controller.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_live_assignment_is_not_found() {
        let controller = controller();
        controller.create_task("t1", "", "json").await;
        assert_eq!(
            controller.stop_task("t1").await,
            ControlResponse::task_not_found()
        );

        // 分配的通道已被移除
        controller
            .scheduler()
            .registry()
            .update("t1", |task| task.mark_running("client 9"))
            .await;
        assert_eq!(
            controller.stop_task("t1").await,
            ControlResponse::task_not_found()
        );
        assert_eq!(
            controller.get_task("t1").await.unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let controller = controller();
        controller.create_task("t1", "", "json").await;

        assert_eq!(controller.delete_task("t1").await, ControlResponse::ok());
        assert_eq!(
            controller.delete_task("t1").await,
            ControlResponse::task_not_found()
        );
    }

    #[tokio::test]
    async fn test_start_requires_stopped_task() {
        let controller = controller();
        controller.create_task("t1", "", "json").await;
        controller
            .scheduler()
            .registry()
            .update("t1", |task| task.mark_running("client 1"))
            .await;

        let response = controller.start_task("t1").await;
        assert_eq!(
            response.message.as_deref(),
            Some("you can only start a stopped task, current status is running")
        );

        assert_eq!(
            controller.start_task("missing").await,
            ControlResponse::task_not_found()
        );
    }

    #[tokio::test]
    async fn test_start_stopped_task_without_worker_stays_stopped() {
        let controller = controller();
        controller.create_task("t1", "", "json").await;
        controller
            .scheduler()
            .registry()
            .update("t1", |task| task.status = TaskStatus::Stopped)
            .await;

        assert!(controller.start_task("t1").await.is_ok());
        assert_eq!(
            controller.get_task("t1").await.unwrap().status,
            TaskStatus::Stopped
        );
    }
}
