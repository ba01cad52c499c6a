//! 任务注册表
//!
//! 按插入顺序保存全部任务。每次修改都在一次加锁内完成，锁不会跨越 `.await`。

use tokio::sync::RwLock;

use taskplane_core::models::{Task, TaskStatus};

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<Vec<Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加任务，同名任务已存在时返回 false
    pub async fn insert(&self, task: Task) -> bool {
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.name == task.name) {
            return false;
        }
        tasks.push(task);
        true
    }

    pub async fn get(&self, name: &str) -> Option<Task> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    pub async fn remove(&self, name: &str) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let index = tasks.iter().position(|t| t.name == name)?;
        Some(tasks.remove(index))
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    /// 按插入顺序返回处于指定状态的任务名
    pub async fn names_with_status(&self, status: TaskStatus) -> Vec<String> {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.name.clone())
            .collect()
    }

    /// 在锁内修改单个任务，任务不存在时返回 `None`
    pub async fn update<F, T>(&self, name: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut Task) -> T,
    {
        let mut tasks = self.tasks.write().await;
        tasks.iter_mut().find(|t| t.name == name).map(f)
    }

    /// 仅当任务仍处于 `expected` 状态时将其置为 `running`
    ///
    /// 这是派发时任务侧的提交点，同一任务不会被并发派发两次。
    pub async fn claim_for_dispatch(
        &self,
        name: &str,
        expected: TaskStatus,
        channel_identity: &str,
    ) -> bool {
        self.update(name, |task| {
            if task.status != expected {
                return false;
            }
            task.mark_running(channel_identity);
            true
        })
        .await
        .unwrap_or(false)
    }

    /// 撤销一次未能送达的派发
    pub async fn revert_dispatch(&self, name: &str, previous: TaskStatus) {
        self.update(name, |task| {
            if task.status == TaskStatus::Running {
                task.status = previous;
                task.assigned_to = None;
                task.updated_at = chrono::Utc::now();
            }
        })
        .await;
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
