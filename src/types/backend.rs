use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Error,
}

/// `GET /api/health` 的响应；`status == error` 时 `models` 里是错误描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default)]
    pub models: Vec<String>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == HealthState::Ok
    }
}

/// 后端保存的历史消息，role 可能是 user/assistant/system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageItem {
    pub role: String,
    pub content: String,
}

/// `POST /api/run` 的请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub agent_id: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// 后台运行已受理；`run_id` 用于之后查询追踪信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: String,
    pub agent_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub final_output: Option<String>,
    #[serde(default = "default_run_status")]
    pub status: String,
}

fn default_run_status() -> String {
    "completed".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_omits_missing_conversation() {
        let request = RunRequest {
            agent_id: "a1".to_string(),
            input: "hi".to_string(),
            conversation_id: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("conversation_id").is_none());
    }

    #[test]
    fn test_run_response_defaults() {
        let response: RunResponse =
            serde_json::from_str(r#"{"run_id":"r1","agent_id":"a1","conversation_id":"c1"}"#)
                .unwrap();
        assert_eq!(response.status, "completed");
        assert!(response.final_output.is_none());
    }
}
