use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-4.1";

/// 函数工具名必须是合法的标识符（后端按名字查找函数）
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Function,
    WebSearch,
    FileSearch,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Function => "function",
            ToolKind::WebSearch => "web_search",
            ToolKind::FileSearch => "file_search",
        }
    }
}

impl std::str::FromStr for ToolKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(ToolKind::Function),
            "web_search" => Ok(ToolKind::WebSearch),
            "file_search" => Ok(ToolKind::FileSearch),
            other => Err(ValidationError::UnknownToolKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// 后端保存的 agent 定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub instructions: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("名称不能为空")]
    EmptyName,
    #[error("指令不能为空")]
    EmptyInstructions,
    #[error("模型不能为空")]
    EmptyModel,
    #[error("工具 #{0} 缺少名称")]
    EmptyToolName(usize),
    #[error("工具名重复：{0}")]
    DuplicateTool(String),
    #[error("函数工具名不是合法标识符：{0}")]
    InvalidFunctionName(String),
    #[error("函数工具 {0} 缺少 function_code")]
    MissingFunctionCode(String),
    #[error("未知工具类型：{0}")]
    UnknownToolKind(String),
}

/// 创建/编辑表单提交的内容，提交前先校验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDraft {
    pub name: String,
    pub instructions: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

impl AgentDraft {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        AgentDraft {
            name: name.into(),
            instructions: instructions.into(),
            model: default_model(),
            tools: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.check(true)
    }

    /// 工具来自后端已保存的记录时使用：缺少 function_code 的函数工具后端会跳过，不算错误
    pub fn validate_existing_tools(&self) -> Result<(), ValidationError> {
        self.check(false)
    }

    fn check(&self, require_code: bool) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.instructions.trim().is_empty() {
            return Err(ValidationError::EmptyInstructions);
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::EmptyModel);
        }

        let mut seen = std::collections::HashSet::new();
        for (index, tool) in self.tools.iter().enumerate() {
            let name = tool.name.trim();
            if name.is_empty() {
                return Err(ValidationError::EmptyToolName(index + 1));
            }
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateTool(name.to_string()));
            }
            if tool.kind == ToolKind::Function {
                if !IDENTIFIER.is_match(name) {
                    return Err(ValidationError::InvalidFunctionName(name.to_string()));
                }
                let has_code = tool
                    .function_code
                    .as_deref()
                    .is_some_and(|code| !code.trim().is_empty());
                if require_code && !has_code {
                    return Err(ValidationError::MissingFunctionCode(name.to_string()));
                }
            }
        }

        Ok(())
    }

    /// 组装成完整记录；`id` 为空时生成新的 UUID
    pub fn into_record(self, id: Option<String>) -> AgentRecord {
        let now = chrono::Local::now().naive_local();
        AgentRecord {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: self.name.trim().to_string(),
            instructions: self.instructions,
            model: self.model.trim().to_string(),
            tools: self.tools,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<&AgentRecord> for AgentDraft {
    fn from(record: &AgentRecord) -> Self {
        AgentDraft {
            name: record.name.clone(),
            instructions: record.instructions.clone(),
            model: record.model.clone(),
            tools: record.tools.clone(),
        }
    }
}
