//! 单条双工连接的封装
//!
//! `Channel` 负责帧的编解码写出，以及连接的存活/派发状态记录。读半部由
//! [`MessageReader`] 单独持有，因为同一时刻只有一个处理任务在读取。

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::{ChannelInfo, ChannelStatus};
use crate::protocol::{read_frame, write_frame, Message, Received, WorkerTelemetry};

/// 单次写入的最长时间，超时视为连接已断开
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug)]
struct ChannelState {
    status: ChannelStatus,
    last_heartbeat: Instant,
    current_task: Option<String>,
    telemetry: Option<WorkerTelemetry>,
}

pub struct Channel {
    identity: String,
    remote_address: String,
    connected_at: DateTime<Utc>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    state: Mutex<ChannelState>,
    closed_tx: watch::Sender<bool>,
}

impl Channel {
    /// 为已建立的连接创建通道，状态为 `ready`，心跳时间初始化为当前时刻
    pub fn new(
        identity: impl Into<String>,
        remote_address: impl Into<String>,
        writer: BoxedWriter,
    ) -> Self {
        Self::with_writer(identity.into(), remote_address.into(), Some(writer))
    }

    /// 创建尚未绑定写半部的通道 (worker端在首次连接前使用)
    pub fn detached(identity: impl Into<String>, remote_address: impl Into<String>) -> Self {
        Self::with_writer(identity.into(), remote_address.into(), None)
    }

    fn with_writer(identity: String, remote_address: String, writer: Option<BoxedWriter>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            identity,
            remote_address,
            connected_at: Utc::now(),
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(ChannelState {
                status: ChannelStatus::Ready,
                last_heartbeat: Instant::now(),
                current_task: None,
                telemetry: None,
            }),
            closed_tx,
        }
    }

    /// 绑定新的写半部 (重连后使用)，通道恢复为 `ready`
    pub async fn attach(&self, writer: BoxedWriter) {
        // 先清除关闭标记，否则并发的 send 会把新的写半部当作已关闭丢弃
        self.closed_tx.send_replace(false);
        {
            let mut state = self.state();
            state.status = ChannelStatus::Ready;
            state.last_heartbeat = Instant::now();
        }
        *self.writer.lock().await = Some(writer);
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 编码并写出一条消息
    ///
    /// 写半部缺失或写入失败时返回 `ChannelClosed`；写入失败后写半部被丢弃。
    pub async fn send(&self, message: &Message) -> SchedulerResult<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(SchedulerError::ChannelClosed {
                identity: self.identity.clone(),
            });
        };

        // 对端停止读取时写入会一直挂起，关闭信号与超时都会中断它
        let written = tokio::select! {
            result = tokio::time::timeout(SEND_TIMEOUT, write_frame(writer, message)) => match result {
                Ok(result) => result,
                Err(_) => Err(SchedulerError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("写入超过 {}ms", SEND_TIMEOUT.as_millis()),
                ))),
            },
            _ = self.closed() => Err(SchedulerError::ChannelClosed {
                identity: self.identity.clone(),
            }),
        };

        match written {
            Ok(()) => {
                debug!(channel = %self.identity, command = message.command(), "消息已发送");
                Ok(())
            }
            Err(SchedulerError::Io(e)) => {
                warn!(channel = %self.identity, error = %e, "写入通道失败");
                *guard = None;
                Err(SchedulerError::ChannelClosed {
                    identity: self.identity.clone(),
                })
            }
            Err(e @ SchedulerError::ChannelClosed { .. }) => {
                debug!(channel = %self.identity, "通道关闭，放弃未完成的写入");
                *guard = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// 包装读半部，得到消息序列
    pub fn receive<R>(reader: R) -> MessageReader<R>
    where
        R: AsyncRead + Unpin,
    {
        MessageReader::new(reader)
    }

    pub fn status(&self) -> ChannelStatus {
        self.state().status
    }

    pub fn current_task(&self) -> Option<String> {
        self.state().current_task.clone()
    }

    pub fn telemetry(&self) -> Option<WorkerTelemetry> {
        self.state().telemetry
    }

    /// 原子地将 `ready` 置为 `busy` 并记录任务名；非 `ready` 时返回 false
    pub fn try_reserve(&self, task_name: &str) -> bool {
        let mut state = self.state();
        if state.status != ChannelStatus::Ready {
            return false;
        }
        state.status = ChannelStatus::Busy;
        state.current_task = Some(task_name.to_string());
        true
    }

    /// 任务进入终态后将通道放回 `ready`
    ///
    /// 只有当 `task_name` 正是该通道当前执行的任务时才会生效。
    pub fn release(&self, task_name: &str) -> bool {
        let mut state = self.state();
        if state.status != ChannelStatus::Busy || state.current_task.as_deref() != Some(task_name)
        {
            return false;
        }
        state.status = ChannelStatus::Ready;
        state.current_task = None;
        true
    }

    pub fn touch_heartbeat(&self) {
        self.touch_heartbeat_at(Instant::now());
    }

    pub fn touch_heartbeat_at(&self, at: Instant) {
        self.state().last_heartbeat = at;
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.state().last_heartbeat
    }

    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat())
    }

    /// 距离上次心跳严格超过 `timeout` 视为失效
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.heartbeat_age(now) > timeout
    }

    pub fn record_telemetry(&self, telemetry: WorkerTelemetry) {
        self.state().telemetry = Some(telemetry);
    }

    /// 关闭通道：状态置为 `stopped`，唤醒等待 [`Channel::closed`] 的读取任务，
    /// 并关闭写半部
    pub async fn close(&self) {
        self.state().status = ChannelStatus::Stopped;
        self.closed_tx.send_replace(true);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(SEND_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(channel = %self.identity, error = %e, "关闭写半部失败"),
                Err(_) => debug!(channel = %self.identity, "关闭写半部超时"),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// 等待通道被关闭
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // 发送端由通道自身持有，wait_for 不会因发送端被丢弃而返回错误
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn info(&self, now: Instant) -> ChannelInfo {
        let state = self.state();
        ChannelInfo {
            identity: self.identity.clone(),
            remote_address: self.remote_address.clone(),
            status: state.status,
            current_task: state.current_task.clone(),
            telemetry: state.telemetry,
            connected_at: self.connected_at,
            heartbeat_age_ms: now
                .saturating_duration_since(state.last_heartbeat)
                .as_millis() as u64,
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("identity", &self.identity)
            .field("remote_address", &self.remote_address)
            .field("state", &*self.state())
            .finish()
    }
}

/// 读半部上的消息序列
///
/// 序列不可重启：读到 `Received::Closed` 或错误后即终止。
pub struct MessageReader<R> {
    reader: R,
    finished: bool,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    /// 读取下一项；序列结束后持续返回 `Received::Closed`
    pub async fn next_message(&mut self) -> SchedulerResult<Received> {
        if self.finished {
            return Ok(Received::Closed);
        }
        let result = read_frame(&mut self.reader).await;
        if matches!(result, Ok(Received::Closed) | Err(_)) {
            self.finished = true;
        }
        result
    }
}
