use serde::{Deserialize, Serialize};

pub const TASK_NOT_FOUND: &str = "task not found";
pub const TASK_ALREADY_EXISTS: &str = "task already exists";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Ok,
    Error,
}

/// 任务控制操作的返回值
///
/// 序列化为 `{"status": "ok"}` 或 `{"status": "error", "message": "..."}`，
/// 调用方根据 `status` 分支，控制操作本身从不返回错误。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: ControlStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            status: ControlStatus::Ok,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ControlStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn task_not_found() -> Self {
        Self::error(TASK_NOT_FOUND)
    }

    pub fn is_ok(&self) -> bool {
        self.status == ControlStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        assert_eq!(
            serde_json::to_value(ControlResponse::ok()).unwrap(),
            json!({"status": "ok"})
        );
        assert_eq!(
            serde_json::to_value(ControlResponse::task_not_found()).unwrap(),
            json!({"status": "error", "message": "task not found"})
        );
    }
}
