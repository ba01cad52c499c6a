use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::WorkerTelemetry;

/// 通道状态
///
/// 连接建立时为 `Ready`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Ready,
    Busy,
    Stopped,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Ready => "ready",
            ChannelStatus::Busy => "busy",
            ChannelStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// 通道的只读快照，供管理端展示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub identity: String,
    pub remote_address: String,
    pub status: ChannelStatus,
    pub current_task: Option<String>,
    pub telemetry: Option<WorkerTelemetry>,
    pub connected_at: DateTime<Utc>,
    /// 距离上次心跳的毫秒数
    pub heartbeat_age_ms: u64,
}
