use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use taskplane_core::{
    config::DispatcherConfig,
    models::{ChannelInfo, ChannelStatus, Task, TaskStatus},
    protocol::{Message, TaskDispatch},
    Channel, SchedulerResult,
};

use crate::connection_handler::ConnectionHandler;
use crate::registry::TaskRegistry;
use crate::strategies::{FirstReadyStrategy, TaskDispatchStrategy};
use crate::worker_failure_detector::WorkerFailureDetector;

/// 一次派发尝试的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `task` 消息已送达，任务进入 `running`
    Dispatched { channel: String },
    /// 没有空闲通道，任务保持原状态，下个周期重试
    NoReadyWorker,
    /// 任务不存在或已不处于可派发状态
    Skipped,
    /// 发送失败，通道已被移除，任务恢复原状态
    SendFailed { channel: String },
}

/// 控制平面调度器
///
/// 持有活动通道集合与任务注册表。两个集合的成员增删只在这里发生。
pub struct Scheduler {
    config: DispatcherConfig,
    channels: RwLock<Vec<Arc<Channel>>>,
    registry: TaskRegistry,
    strategy: Arc<dyn TaskDispatchStrategy>,
    next_client: AtomicU64,
}

impl Scheduler {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_strategy(config, Arc::new(FirstReadyStrategy::new()))
    }

    pub fn with_strategy(config: DispatcherConfig, strategy: Arc<dyn TaskDispatchStrategy>) -> Self {
        Self {
            config,
            channels: RwLock::new(Vec::new()),
            registry: TaskRegistry::new(),
            strategy,
            next_client: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// 分配下一个通道标识 `client N`
    pub fn next_identity(&self) -> String {
        let n = self.next_client.fetch_add(1, Ordering::Relaxed);
        format!("client {n}")
    }

    pub async fn register_channel(&self, channel: Arc<Channel>) {
        info!(
            channel = %channel.identity(),
            remote = %channel.remote_address(),
            "新的worker连接"
        );
        self.channels.write().await.push(channel);
    }

    /// 关闭并移除通道，返回是否确实移除了
    pub async fn remove_channel(&self, identity: &str) -> bool {
        let removed = {
            let mut channels = self.channels.write().await;
            let index = channels.iter().position(|c| c.identity() == identity);
            index.map(|i| channels.remove(i))
        };

        match removed {
            Some(channel) => {
                channel.close().await;
                info!(channel = %identity, "通道已移除");
                true
            }
            None => false,
        }
    }

    /// 通道集合的稳定快照，迭代期间的增删不影响快照
    pub async fn channels_snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels.read().await.clone()
    }

    pub async fn find_channel(&self, identity: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .await
            .iter()
            .find(|c| c.identity() == identity)
            .cloned()
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn channel_infos(&self) -> Vec<ChannelInfo> {
        let now = Instant::now();
        self.channels_snapshot()
            .await
            .iter()
            .map(|c| c.info(now))
            .collect()
    }

    pub async fn bind(&self) -> SchedulerResult<TcpListener> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(address = %self.config.bind_address, "调度器开始监听");
        Ok(listener)
    }

    /// 绑定配置的地址并接受连接
    pub async fn accept_loop(self: Arc<Self>) -> SchedulerResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// 在已绑定的监听器上接受连接，每个连接一个处理任务
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> SchedulerResult<()> {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "接受连接失败");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "设置TCP_NODELAY失败");
            }

            let (reader, writer) = stream.into_split();
            let channel = Arc::new(Channel::new(
                self.next_identity(),
                remote.to_string(),
                Box::new(writer),
            ));
            self.register_channel(channel.clone()).await;

            let handler = ConnectionHandler::new(self.clone(), channel);
            tokio::spawn(handler.run(reader));
        }
    }

    /// 尝试将任务派发到一个空闲通道
    ///
    /// 只有 `created` 或 `stopped` 的任务可以派发。策略在快照上挑选候选，
    /// `try_reserve` 是通道侧的提交点，竞争失败时换下一个候选。
    pub async fn schedule_task(&self, name: &str) -> SchedulerResult<DispatchOutcome> {
        let Some(task) = self.registry.get(name).await else {
            return Ok(DispatchOutcome::Skipped);
        };
        let previous = task.status;
        if !matches!(previous, TaskStatus::Created | TaskStatus::Stopped) {
            debug!(task = %name, status = %previous, "任务不可派发");
            return Ok(DispatchOutcome::Skipped);
        }

        let mut lost_races: HashSet<String> = HashSet::new();
        loop {
            let now = Instant::now();
            let candidates: Vec<ChannelInfo> = self
                .channels_snapshot()
                .await
                .iter()
                .filter(|c| c.status() == ChannelStatus::Ready)
                .filter(|c| !lost_races.contains(c.identity()))
                .map(|c| c.info(now))
                .collect();

            let Some(identity) = self.strategy.select_worker(&task, &candidates).await? else {
                debug!(task = %name, "暂无空闲通道，等待下次派发");
                return Ok(DispatchOutcome::NoReadyWorker);
            };
            let Some(channel) = self.find_channel(&identity).await else {
                lost_races.insert(identity);
                continue;
            };
            if !channel.try_reserve(name) {
                lost_races.insert(identity);
                continue;
            }

            if !self
                .registry
                .claim_for_dispatch(name, previous, &identity)
                .await
            {
                channel.release(name);
                debug!(task = %name, "任务状态已变化，放弃派发");
                return Ok(DispatchOutcome::Skipped);
            }

            return self.send_dispatch(&task, previous, channel).await;
        }
    }

    async fn send_dispatch(
        &self,
        task: &Task,
        previous: TaskStatus,
        channel: Arc<Channel>,
    ) -> SchedulerResult<DispatchOutcome> {
        let message = Message::Task(TaskDispatch {
            task_name: task.name.clone(),
            args_to_run: task.args.clone(),
            return_type: task.return_type.clone(),
        });

        let identity = channel.identity().to_string();
        match channel.send(&message).await {
            Ok(()) => {
                info!(task = %task.name, channel = %identity, "任务已派发");
                Ok(DispatchOutcome::Dispatched { channel: identity })
            }
            Err(e) if e.is_connection_error() => {
                warn!(task = %task.name, channel = %identity, error = %e, "派发消息发送失败");
                self.registry.revert_dispatch(&task.name, previous).await;
                self.remove_channel(&identity).await;
                Ok(DispatchOutcome::SendFailed { channel: identity })
            }
            Err(e) => {
                self.registry.revert_dispatch(&task.name, previous).await;
                channel.release(&task.name);
                Err(e)
            }
        }
    }

    /// 对所有 `created` 任务执行一次派发
    pub async fn dispatch_sweep(&self) -> usize {
        let mut dispatched = 0;
        for name in self.registry.names_with_status(TaskStatus::Created).await {
            match self.schedule_task(&name).await {
                Ok(DispatchOutcome::Dispatched { .. }) => dispatched += 1,
                Ok(DispatchOutcome::NoReadyWorker) => break,
                Ok(_) => {}
                Err(e) => error!(task = %name, error = %e, "派发任务时出错"),
            }
        }
        dispatched
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.dispatch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let dispatched = self.dispatch_sweep().await;
            if dispatched > 0 {
                debug!(count = dispatched, "本轮派发完成");
            }
        }
    }

    /// 关闭所有通道
    pub async fn close_all(&self) {
        let channels = std::mem::take(&mut *self.channels.write().await);
        for channel in channels {
            channel.close().await;
        }
    }

    /// 运行接受循环、存活检测与派发扫描，直到收到关闭信号
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SchedulerResult<()> {
        let detector = WorkerFailureDetector::new(
            self.clone(),
            self.config.heartbeat_timeout(),
            self.config.liveness_interval(),
        );

        let result = tokio::select! {
            result = self.clone().serve(listener) => result,
            _ = detector.run_loop() => Ok(()),
            _ = self.clone().dispatch_loop() => Ok(()),
            _ = shutdown.recv() => {
                info!("收到关闭信号，调度器停止");
                Ok(())
            }
        };

        self.close_all().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskplane_core::protocol::{read_frame, Received};
    use tokio::io::DuplexStream;

    fn scheduler() -> Arc<Scheduler> {
        Arc::new(Scheduler::new(DispatcherConfig::default()))
    }

    async fn attach_worker(scheduler: &Scheduler) -> (Arc<Channel>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let channel = Arc::new(Channel::new(
            scheduler.next_identity(),
            "127.0.0.1:1",
            Box::new(local),
        ));
        scheduler.register_channel(channel.clone()).await;
        (channel, remote)
    }

    #[test]
    fn test_identities_are_sequential() {
        let scheduler = Scheduler::new(DispatcherConfig::default());
        assert_eq!(scheduler.next_identity(), "client 1");
        assert_eq!(scheduler.next_identity(), "client 2");
    }

    #[tokio::test]
    async fn test_schedule_without_ready_worker_has_no_effect() {
        let scheduler = scheduler();
        scheduler.registry().insert(Task::new("t1", "", "json")).await;

        let outcome = scheduler.schedule_task("t1").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NoReadyWorker);

        let task = scheduler.registry().get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        assert!(task.assigned_to.is_none());
    }

    #[tokio::test]
    async fn test_schedule_sends_task_frame() {
        let scheduler = scheduler();
        let (channel, mut remote) = attach_worker(&scheduler).await;
        scheduler
            .registry()
            .insert(Task::new("t1", "main.py --flag", "json"))
            .await;

        let outcome = scheduler.schedule_task("t1").await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                channel: "client 1".to_string()
            }
        );
        assert_eq!(channel.status(), ChannelStatus::Busy);
        assert_eq!(channel.current_task().as_deref(), Some("t1"));

        let received = read_frame(&mut remote).await.unwrap();
        assert_eq!(
            received,
            Received::Message(Message::Task(TaskDispatch {
                task_name: "t1".to_string(),
                args_to_run: "main.py --flag".to_string(),
                return_type: "json".to_string(),
            }))
        );
    }

    #[tokio::test]
    async fn test_busy_channel_is_never_double_booked() {
        let scheduler = scheduler();
        let (_channel, _remote) = attach_worker(&scheduler).await;
        for name in ["t1", "t2"] {
            scheduler.registry().insert(Task::new(name, "", "json")).await;
        }

        assert_eq!(scheduler.dispatch_sweep().await, 1);
        assert_eq!(
            scheduler.registry().get("t2").await.unwrap().status,
            TaskStatus::Created
        );
    }

    #[tokio::test]
    async fn test_send_failure_removes_channel_and_keeps_task() {
        let scheduler = scheduler();
        let (_channel, remote) = attach_worker(&scheduler).await;
        drop(remote);
        scheduler.registry().insert(Task::new("t1", "", "json")).await;

        let outcome = scheduler.schedule_task("t1").await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::SendFailed {
                channel: "client 1".to_string()
            }
        );
        assert_eq!(scheduler.channel_count().await, 0);

        let task = scheduler.registry().get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        assert!(task.is_consistent());
    }

    #[tokio::test]
    async fn test_remove_channel_closes_it() {
        let scheduler = scheduler();
        let (channel, _remote) = attach_worker(&scheduler).await;

        assert!(scheduler.remove_channel("client 1").await);
        assert!(!scheduler.remove_channel("client 1").await);
        assert!(channel.is_closed());
        assert_eq!(channel.status(), ChannelStatus::Stopped);
    }
}
