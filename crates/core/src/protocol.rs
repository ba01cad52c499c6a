//! 控制通道的线协议
//!
//! 每一帧由4字节大端长度前缀和UTF-8 JSON数组组成：
//! `[command, positional_args..., payload]`，其中 `payload` 总是最后一个元素，
//! 没有负载的命令携带空对象 `{}`。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SchedulerError, SchedulerResult};

/// 帧头长度（字节）
pub const FRAME_HEADER_SIZE: usize = 4;

/// 单帧最大负载 (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

pub const CMD_PING: &str = "ping";
pub const CMD_PONG: &str = "pong";
pub const CMD_TASK: &str = "task";
pub const CMD_STOP_TASK: &str = "stop-task";
pub const CMD_TASK_RUNNING: &str = "task-running";
pub const CMD_TASK_FINISHED: &str = "task-finished";
pub const CMD_TASK_STOPPED: &str = "task-stopped";
pub const CMD_TASK_FAILED: &str = "task-failed";
pub const CMD_INFO: &str = "info";

/// `task` 命令的负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub task_name: String,
    pub args_to_run: String,
    pub return_type: String,
}

/// `task-running` 命令的负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunning {
    pub task_name: String,
}

/// `task-finished` / `task-stopped` / `task-failed` 的负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_name: String,
    pub return_value: String,
}

/// `info` 命令的负载
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerTelemetry {
    pub cpu: f64,
    pub memory: f64,
}

/// 协议消息
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping,
    Pong,
    Task(TaskDispatch),
    StopTask,
    TaskRunning(TaskRunning),
    TaskFinished(TaskOutcome),
    TaskStopped(TaskOutcome),
    TaskFailed(TaskOutcome),
    Info(WorkerTelemetry),
    /// 未识别的命令，原样保留以便处理方记录协议违规
    Unknown {
        command: String,
        args: Vec<Value>,
        payload: Map<String, Value>,
    },
}

/// 从流中读取到的一项
///
/// `Closed` 表示对端在帧边界处关闭了连接，它不是任何命令。
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(Message),
    Closed,
}

impl Message {
    pub fn command(&self) -> &str {
        match self {
            Message::Ping => CMD_PING,
            Message::Pong => CMD_PONG,
            Message::Task(_) => CMD_TASK,
            Message::StopTask => CMD_STOP_TASK,
            Message::TaskRunning(_) => CMD_TASK_RUNNING,
            Message::TaskFinished(_) => CMD_TASK_FINISHED,
            Message::TaskStopped(_) => CMD_TASK_STOPPED,
            Message::TaskFailed(_) => CMD_TASK_FAILED,
            Message::Info(_) => CMD_INFO,
            Message::Unknown { command, .. } => command,
        }
    }

    /// 编码为帧体 (不含长度前缀)
    pub fn to_body(&self) -> SchedulerResult<Vec<u8>> {
        let payload = match self {
            Message::Ping | Message::Pong | Message::StopTask => Value::Object(Map::new()),
            Message::Task(p) => serde_json::to_value(p)?,
            Message::TaskRunning(p) => serde_json::to_value(p)?,
            Message::TaskFinished(p) | Message::TaskStopped(p) | Message::TaskFailed(p) => {
                serde_json::to_value(p)?
            }
            Message::Info(p) => serde_json::to_value(p)?,
            Message::Unknown { payload, .. } => Value::Object(payload.clone()),
        };

        let mut record = vec![Value::String(self.command().to_string())];
        if let Message::Unknown { args, .. } = self {
            record.extend(args.iter().cloned());
        }
        record.push(payload);

        Ok(serde_json::to_vec(&Value::Array(record))?)
    }

    /// 从帧体解码
    pub fn from_body(body: &[u8]) -> SchedulerResult<Self> {
        let value: Value = serde_json::from_slice(body)?;
        let Value::Array(mut record) = value else {
            return Err(SchedulerError::ProtocolViolation(
                "消息必须是JSON数组".to_string(),
            ));
        };
        if record.len() < 2 {
            return Err(SchedulerError::ProtocolViolation(format!(
                "消息至少包含命令和负载，实际长度 {}",
                record.len()
            )));
        }

        let command = match record.remove(0) {
            Value::String(command) => command,
            other => {
                return Err(SchedulerError::ProtocolViolation(format!(
                    "命令必须是字符串: {other}"
                )))
            }
        };
        let payload = match record.pop() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(SchedulerError::ProtocolViolation(format!(
                    "负载必须是对象: {other}"
                )))
            }
            None => Map::new(),
        };
        let args = record;
        let payload_value = Value::Object(payload.clone());

        let message = match command.as_str() {
            CMD_PING => Message::Ping,
            CMD_PONG => Message::Pong,
            CMD_STOP_TASK => Message::StopTask,
            CMD_TASK => Message::Task(serde_json::from_value(payload_value)?),
            CMD_TASK_RUNNING => Message::TaskRunning(serde_json::from_value(payload_value)?),
            CMD_TASK_FINISHED => Message::TaskFinished(serde_json::from_value(payload_value)?),
            CMD_TASK_STOPPED => Message::TaskStopped(serde_json::from_value(payload_value)?),
            CMD_TASK_FAILED => Message::TaskFailed(serde_json::from_value(payload_value)?),
            CMD_INFO => Message::Info(serde_json::from_value(payload_value)?),
            _ => Message::Unknown {
                command,
                args,
                payload,
            },
        };

        Ok(message)
    }
}

/// 写入一帧
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> SchedulerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = message.to_body()?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(SchedulerError::ProtocolViolation(format!(
            "消息过大: {} 字节 (上限 {})",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一帧
///
/// 在帧边界处读到EOF时返回 `Received::Closed`；帧中途EOF视为连接丢失。
pub async fn read_frame<R>(reader: &mut R) -> SchedulerResult<Received>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(Received::Closed);
            }
            return Err(SchedulerError::ConnectionLost(
                "读取帧头时连接被关闭".to_string(),
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(SchedulerError::ProtocolViolation(format!(
            "消息过大: {len} 字节 (上限 {MAX_FRAME_SIZE})"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SchedulerError::ConnectionLost("读取帧体时连接被关闭".to_string())
        } else {
            SchedulerError::Io(e)
        }
    })?;

    Ok(Received::Message(Message::from_body(&body)?))
}
