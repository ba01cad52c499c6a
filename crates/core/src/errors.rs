use thiserror::Error;

/// 控制平面错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("连接已断开: {0}")]
    ConnectionLost(String),

    #[error("通道已关闭: {identity}")]
    ChannelClosed { identity: String },

    #[error("任务未找到: {name}")]
    TaskNotFound { name: String },

    /// 文本即控制操作返回给管理端的 `message`
    #[error("you can only start a stopped task, current status is {status}")]
    InvalidTaskState { name: String, status: String },

    #[error("任务制品下载失败: {0}")]
    ArtifactDownload(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("协议违规: {0}")]
    ProtocolViolation(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 该错误是否意味着底层连接已经不可用
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::ConnectionLost(_)
                | SchedulerError::ChannelClosed { .. }
                | SchedulerError::Io(_)
        )
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
