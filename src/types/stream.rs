use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 流式连接建立后发送的第一帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningFrame {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 一条已定稿的消息，追加后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    ToolOutput,
}

/// 工具调用或其结果的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ExecutionStep {
    /// 单行摘要，供终端展示
    pub fn summary(&self) -> String {
        let name = self.name.as_deref().unwrap_or("?");
        match self.kind {
            StepKind::ToolCall => match &self.args {
                Some(args) => format!("🔧 {}({})", name, args),
                None => format!("🔧 {}()", name),
            },
            StepKind::ToolOutput => {
                let output = match &self.output {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                format!("📤 {} -> {}", name, output)
            }
        }
    }
}
