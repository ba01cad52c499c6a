use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务定义
///
/// # 字段说明
///
/// - `name`: 任务的唯一名称，由管理端创建时指定
/// - `status`: 当前状态，调度器为权威来源
/// - `assigned_to`: 执行该任务的通道标识，当且仅当 `status == Running` 时存在
/// - `args`: 单个命令行参数字符串，执行前按空白拆分
/// - `return_type`: 透传给worker的返回值描述，调度器不解释
/// - `result`: 最近一次上报的 `return_value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub args: String,
    pub return_type: String,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Running,
    Stopped,
    Failed,
    Finished,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Failed => "failed",
            TaskStatus::Finished => "finished",
        }
    }

    /// worker上报后任务离开 `running` 的状态
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    /// 创建一个处于 `created` 状态的新任务
    pub fn new(
        name: impl Into<String>,
        args: impl Into<String>,
        return_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            status: TaskStatus::Created,
            assigned_to: None,
            args: args.into(),
            return_type: return_type.into(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 派发成功后进入 `running` 并记录执行通道
    pub fn mark_running(&mut self, channel_identity: &str) {
        self.status = TaskStatus::Running;
        self.assigned_to = Some(channel_identity.to_string());
        self.updated_at = Utc::now();
    }

    /// 任务离开 `running`，清除 `assigned_to`
    pub fn mark_outcome(&mut self, status: TaskStatus, result: Option<String>) {
        debug_assert!(status.is_outcome());
        self.status = status;
        self.assigned_to = None;
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = Utc::now();
    }

    /// 不变量：`assigned_to` 存在当且仅当状态为 `running`
    pub fn is_consistent(&self) -> bool {
        self.assigned_to.is_some() == (self.status == TaskStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_created_and_unassigned() {
        let task = Task::new("build", "main.py --fast", "json");
        assert_eq!(task.status, TaskStatus::Created);
        assert!(task.assigned_to.is_none());
        assert!(task.is_consistent());
    }

    #[test]
    fn test_running_then_outcome_keeps_invariant() {
        let mut task = Task::new("build", "main.py", "json");

        task.mark_running("client 1");
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assigned_to.as_deref(), Some("client 1"));
        assert!(task.is_consistent());

        task.mark_outcome(TaskStatus::Finished, Some("done".to_string()));
        assert_eq!(task.status, TaskStatus::Finished);
        assert!(task.assigned_to.is_none());
        assert_eq!(task.result.as_deref(), Some("done"));
        assert!(task.is_consistent());
    }

    #[test]
    fn test_status_helpers() {
        assert!(TaskStatus::Stopped.is_outcome());
        assert!(!TaskStatus::Running.is_outcome());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(TaskStatus::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&TaskStatus::Stopped).unwrap(),
            "\"stopped\""
        );
    }
}
