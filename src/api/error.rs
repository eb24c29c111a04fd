use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("请求后端失败：{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}（HTTP {status}）")]
    Status { status: StatusCode, message: String },

    #[error("解析响应失败：{source}，原始内容：{body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("后端地址无效：{0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// 从错误响应体中取出服务端提供的说明，取不到时给出通用描述
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let message = server_message(body)
            .unwrap_or_else(|| format!("请求失败，状态码 {}", status.as_u16()));
        ApiError::Status { status, message }
    }
}

fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    for key in ["detail", "message", "error"] {
        match value.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            // FastAPI 的 422 校验错误：detail 是数组
            Some(serde_json::Value::Array(items)) if !items.is_empty() => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| {
                        item.get("msg")
                            .and_then(|m| m.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| item.to_string())
                    })
                    .collect();
                return Some(parts.join("; "));
            }
            _ => {}
        }
    }
    None
}
