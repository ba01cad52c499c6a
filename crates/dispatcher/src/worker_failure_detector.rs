use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use taskplane_core::Channel;

use crate::scheduler::Scheduler;

/// Worker失效检测
///
/// 周期性检查每个通道的最近心跳，超时的通道被关闭并移出活动集合。
/// 每轮检测在通道集合的快照上进行，移除在检测完成后逐个提交。
pub struct WorkerFailureDetector {
    scheduler: Arc<Scheduler>,
    heartbeat_timeout: Duration,
    detection_interval: Duration,
}

impl WorkerFailureDetector {
    pub fn new(
        scheduler: Arc<Scheduler>,
        heartbeat_timeout: Duration,
        detection_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            heartbeat_timeout,
            detection_interval,
        }
    }

    /// 检查通道是否失效
    fn is_worker_failed(&self, channel: &Channel, now: Instant) -> bool {
        channel.is_expired(now, self.heartbeat_timeout)
    }

    /// 返回在 `now` 时刻已超时的通道
    pub async fn detect_failed_workers(&self, now: Instant) -> Vec<Arc<Channel>> {
        self.scheduler
            .channels_snapshot()
            .await
            .into_iter()
            .filter(|channel| self.is_worker_failed(channel, now))
            .collect()
    }

    /// 执行一次检测，返回被移除的通道数
    pub async fn sweep(&self, now: Instant) -> usize {
        let failed = self.detect_failed_workers(now).await;
        let mut removed = 0;

        for channel in failed {
            warn!(
                channel = %channel.identity(),
                remote = %channel.remote_address(),
                heartbeat_age_ms = channel.heartbeat_age(now).as_millis() as u64,
                "worker心跳超时，移除通道"
            );
            if self.scheduler.remove_channel(channel.identity()).await {
                removed += 1;
            }
        }

        removed
    }

    /// 执行检测循环
    pub async fn run_loop(&self) {
        info!(
            timeout_ms = self.heartbeat_timeout.as_millis() as u64,
            interval_ms = self.detection_interval.as_millis() as u64,
            "启动Worker失效检测循环"
        );

        let mut ticker = tokio::time::interval(self.detection_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = self.sweep(Instant::now()).await;
            if removed > 0 {
                debug!(count = removed, "本轮移除失效通道");
            }
        }
    }
}
