//! 把一帧 JSON 按 `type` 字段归类成封闭的事件集合。

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{ExecutionStep, StepKind};

pub const RAW_RESPONSE_EVENT: &str = "raw_response_event";
pub const RUN_ITEM_STREAM_EVENT: &str = "run_item_stream_event";
pub const FINAL_OUTPUT: &str = "final_output";
pub const ERROR_EVENT: &str = "error";

const TOOL_CALL_ITEM: &str = "tool_call_item";
const TOOL_CALL_OUTPUT_ITEM: &str = "tool_call_output_item";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// 增量文本，仅作预览
    RawResponse { delta: Option<String> },
    /// 运行项；只有工具调用和工具结果会带上 step
    RunItem { step: Option<ExecutionStep> },
    /// 本轮结束，`content` 是权威文本
    FinalOutput {
        conversation_id: Option<String>,
        content: String,
    },
    /// 后端执行出错
    Error { message: String },
    /// 不认识的类型，忽略
    Unknown { kind: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("帧不是合法 JSON：{0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} 帧结构不完整：{reason}")]
    Shape { kind: String, reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub fn interpret(text: &str) -> Result<StreamEvent, FrameError> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let event = match envelope.kind.as_str() {
        RAW_RESPONSE_EVENT => StreamEvent::RawResponse {
            delta: envelope
                .data
                .get("delta")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        RUN_ITEM_STREAM_EVENT => StreamEvent::RunItem {
            step: envelope.data.get("item").and_then(execution_step),
        },
        FINAL_OUTPUT => final_output(&envelope.data)?,
        ERROR_EVENT => StreamEvent::Error {
            message: envelope
                .data
                .get("message")
                .map(text_of)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "未知错误".to_string()),
        },
        other => StreamEvent::Unknown {
            kind: other.to_string(),
        },
    };

    Ok(event)
}

fn final_output(data: &Value) -> Result<StreamEvent, FrameError> {
    if !data.is_object() {
        return Err(FrameError::Shape {
            kind: FINAL_OUTPUT.to_string(),
            reason: "data 不是对象".to_string(),
        });
    }

    let content = data.get("content").map(text_of).unwrap_or_default();
    let conversation_id = data
        .get("conversation_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Ok(StreamEvent::FinalOutput {
        conversation_id,
        content,
    })
}

/// 字符串原样返回，null 为空串，其余值序列化成 JSON 文本
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn execution_step(item: &Value) -> Option<ExecutionStep> {
    let kind = match item.get("type").and_then(Value::as_str)? {
        TOOL_CALL_ITEM => StepKind::ToolCall,
        TOOL_CALL_OUTPUT_ITEM => StepKind::ToolOutput,
        _ => return None,
    };
    let raw = item.get("raw_item");

    let name = item
        .get("name")
        .or_else(|| raw.and_then(|r| r.get("name")))
        .and_then(Value::as_str)
        .map(str::to_string);

    // 参数常以 JSON 字符串形式出现，能解析就展开
    let args = item
        .get("args")
        .or_else(|| raw.and_then(|r| r.get("arguments")))
        .filter(|v| !v.is_null())
        .map(|v| match v {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| v.clone()),
            _ => v.clone(),
        });

    let output = item.get("output").filter(|v| !v.is_null()).cloned();

    Some(ExecutionStep {
        kind,
        name,
        args,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_response_delta() {
        let event = interpret(r#"{"type":"raw_response_event","data":{"delta":"Hel"}}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::RawResponse {
                delta: Some("Hel".to_string())
            }
        );

        let event = interpret(r#"{"type":"raw_response_event","data":{"type":"response.created"}}"#)
            .unwrap();
        assert_eq!(event, StreamEvent::RawResponse { delta: None });
    }

    #[test]
    fn test_final_output() {
        let event = interpret(
            r#"{"type":"final_output","data":{"content":"Hello there","conversation_id":"abc"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::FinalOutput {
                conversation_id: Some("abc".to_string()),
                content: "Hello there".to_string()
            }
        );
    }

    #[test]
    fn test_final_output_structured_content() {
        let event =
            interpret(r#"{"type":"final_output","data":{"content":{"answer":42}}}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::FinalOutput {
                conversation_id: None,
                content: r#"{"answer":42}"#.to_string()
            }
        );
    }

    #[test]
    fn test_final_output_without_object_is_malformed() {
        let err = interpret(r#"{"type":"final_output","data":"done"}"#).unwrap_err();
        assert!(matches!(err, FrameError::Shape { .. }));
    }

    #[test]
    fn test_tool_call_item() {
        let frame = json!({
            "type": "run_item_stream_event",
            "data": {"item": {"type": "tool_call_item", "name": "get_weather", "args": {"city": "Paris"}}}
        });
        let event = interpret(&frame.to_string()).unwrap();
        assert_eq!(
            event,
            StreamEvent::RunItem {
                step: Some(ExecutionStep {
                    kind: StepKind::ToolCall,
                    name: Some("get_weather".to_string()),
                    args: Some(json!({"city": "Paris"})),
                    output: None,
                })
            }
        );
    }

    #[test]
    fn test_tool_call_from_raw_item() {
        let frame = json!({
            "type": "run_item_stream_event",
            "data": {"name": "tool_called", "item": {
                "type": "tool_call_item",
                "raw_item": {"name": "lookup", "arguments": "{\"q\": \"rust\"}"}
            }}
        });
        match interpret(&frame.to_string()).unwrap() {
            StreamEvent::RunItem { step: Some(step) } => {
                assert_eq!(step.name.as_deref(), Some("lookup"));
                assert_eq!(step.args, Some(json!({"q": "rust"})));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_other_run_items_have_no_step() {
        let frame = json!({
            "type": "run_item_stream_event",
            "data": {"item": {"type": "message_output_item"}}
        });
        assert_eq!(
            interpret(&frame.to_string()).unwrap(),
            StreamEvent::RunItem { step: None }
        );
    }

    #[test]
    fn test_unknown_kind_is_not_an_error() {
        let event = interpret(r#"{"type":"agent_updated_stream_event","data":{}}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Unknown {
                kind: "agent_updated_stream_event".to_string()
            }
        );
    }

    #[test]
    fn test_error_event() {
        let event = interpret(r#"{"type":"error","data":{"message":"Agent not found"}}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Error {
                message: "Agent not found".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(interpret("{not json"), Err(FrameError::Json(_))));
        assert!(matches!(interpret(r#"{"data":{}}"#), Err(FrameError::Json(_))));
    }
}
