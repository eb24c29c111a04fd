use thiserror::Error;
use tracing::{debug, warn};

use crate::config::StepRetention;
use crate::types::{ExecutionStep, Turn};

use super::interpreter::{self, StreamEvent};
use super::session::{OpenRequest, SessionEvent};

/// 一轮对话所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("消息不能为空")]
    Empty,
    /// 上一轮还在进行，原文交还给调用方
    #[error("上一轮回复尚未结束")]
    Busy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("连接失败：{0}")]
    ConnectFailed(String),
    #[error("连接在回复完成前关闭{}", close_detail(.code, .reason))]
    ClosedEarly { code: Option<u16>, reason: String },
    #[error("后端返回错误：{0}")]
    Remote(String),
    #[error("已取消")]
    Cancelled,
}

fn close_detail(code: &Option<u16>, reason: &str) -> String {
    match (code, reason.is_empty()) {
        (Some(code), false) => format!("（{}：{}）", code, reason),
        (Some(code), true) => format!("（{}）", code),
        (None, false) => format!("（{}）", reason),
        (None, true) => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Turn(#[from] TurnError),
}

/// 每处理一个事件后的变化，供界面重绘
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Opened,
    Delta(String),
    Step(ExecutionStep),
    Completed(Turn),
    Failed(TurnError),
    /// 坏帧，已记录日志并跳过
    Skipped(String),
    Ignored,
}

impl Update {
    /// 本轮是否已经结束
    pub fn is_terminal(&self) -> bool {
        matches!(self, Update::Completed(_) | Update::Failed(_))
    }
}

/// 对话视图模型：消息列表、正在生成的片段、执行步骤日志
pub struct Conversation {
    agent_id: String,
    conversation_id: Option<String>,
    turns: Vec<Turn>,
    pending: String,
    steps: Vec<ExecutionStep>,
    phase: Phase,
    retention: StepRetention,
    last_error: Option<TurnError>,
}

impl Conversation {
    pub fn new(agent_id: impl Into<String>, retention: StepRetention) -> Self {
        Conversation {
            agent_id: agent_id.into(),
            conversation_id: None,
            turns: Vec::new(),
            pending: String::new(),
            steps: Vec::new(),
            phase: Phase::Idle,
            retention,
            last_error: None,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_in_flight(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn last_error(&self) -> Option<&TurnError> {
        self.last_error.as_ref()
    }

    /// 提交用户输入，成功时返回需要打开的会话请求
    pub fn submit(&mut self, text: &str) -> Result<OpenRequest, SubmitError> {
        if self.is_in_flight() {
            return Err(SubmitError::Busy(text.to_string()));
        }
        if text.trim().is_empty() {
            return Err(SubmitError::Empty);
        }

        if self.retention == StepRetention::PerTurn {
            self.steps.clear();
        }
        self.turns.push(Turn::user(text));
        self.pending.clear();
        self.last_error = None;
        self.phase = Phase::Sending;

        Ok(OpenRequest {
            agent_id: self.agent_id.clone(),
            input: text.to_string(),
            conversation_id: self.conversation_id.clone(),
        })
    }

    /// 处理一个传输事件；所有状态变化都从这里进入
    pub fn apply(&mut self, event: SessionEvent) -> Update {
        if !self.is_in_flight() {
            debug!(?event, "event after turn ended, ignoring");
            return Update::Ignored;
        }

        match event {
            SessionEvent::Opened => Update::Opened,
            SessionEvent::Frame(text) => match interpreter::interpret(&text) {
                Ok(event) => self.apply_stream_event(event),
                Err(e) => {
                    warn!(error = %e, frame = %text, "skipping malformed frame");
                    Update::Skipped(e.to_string())
                }
            },
            SessionEvent::Failed(message) => self.fail(TurnError::ConnectFailed(message)),
            SessionEvent::Closed { code, reason } => {
                self.fail(TurnError::ClosedEarly { code, reason })
            }
        }
    }

    fn apply_stream_event(&mut self, event: StreamEvent) -> Update {
        match event {
            StreamEvent::RawResponse { delta } => {
                self.phase = Phase::Streaming;
                match delta {
                    Some(delta) if !delta.is_empty() => {
                        self.pending.push_str(&delta);
                        Update::Delta(delta)
                    }
                    _ => Update::Ignored,
                }
            }
            StreamEvent::RunItem { step: Some(step) } => {
                self.steps.push(step.clone());
                Update::Step(step)
            }
            StreamEvent::RunItem { step: None } => Update::Ignored,
            StreamEvent::FinalOutput {
                conversation_id,
                content,
            } => {
                if self.conversation_id.is_none() {
                    self.conversation_id = conversation_id;
                }
                // 以最终内容为准，增量片段直接丢弃
                let turn = Turn::assistant(content);
                self.turns.push(turn.clone());
                self.pending.clear();
                self.phase = Phase::Idle;
                Update::Completed(turn)
            }
            StreamEvent::Error { message } => self.fail(TurnError::Remote(message)),
            StreamEvent::Unknown { kind } => {
                debug!(%kind, "ignoring unknown event kind");
                Update::Ignored
            }
        }
    }

    fn fail(&mut self, error: TurnError) -> Update {
        warn!(error = %error, "turn failed");
        self.pending.clear();
        self.phase = Phase::Idle;
        self.last_error = Some(error.clone());
        Update::Failed(error)
    }

    /// 中止进行中的一轮；没有进行中的轮次时返回 `None`
    pub fn cancel(&mut self) -> Option<Update> {
        if !self.is_in_flight() {
            return None;
        }
        Some(self.fail(TurnError::Cancelled))
    }

    /// 开始新对话，进行中时拒绝
    pub fn reset(&mut self) -> Result<(), SubmitError> {
        if self.is_in_flight() {
            return Err(SubmitError::Busy(String::new()));
        }
        self.conversation_id = None;
        self.turns.clear();
        self.pending.clear();
        self.steps.clear();
        self.last_error = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, StepKind};
    use serde_json::json;

    fn frame(value: serde_json::Value) -> SessionEvent {
        SessionEvent::Frame(value.to_string())
    }

    fn delta(text: &str) -> SessionEvent {
        frame(json!({"type": "raw_response_event", "data": {"delta": text}}))
    }

    fn final_output(content: &str, conversation_id: Option<&str>) -> SessionEvent {
        let mut data = json!({"content": content});
        if let Some(id) = conversation_id {
            data["conversation_id"] = json!(id);
        }
        frame(json!({"type": "final_output", "data": data}))
    }

    fn started() -> Conversation {
        let mut conversation = Conversation::new("agent-1", StepRetention::Conversation);
        conversation.submit("hi").unwrap();
        conversation
    }

    #[test]
    fn test_hello_there_scenario() {
        let mut c = started();
        assert_eq!(c.phase(), Phase::Sending);

        assert_eq!(c.apply(SessionEvent::Opened), Update::Opened);
        assert_eq!(c.apply(delta("Hel")), Update::Delta("Hel".to_string()));
        assert_eq!(c.phase(), Phase::Streaming);
        c.apply(delta("lo"));
        assert_eq!(c.pending(), "Hello");

        let update = c.apply(final_output("Hello there", Some("abc")));
        assert_eq!(update, Update::Completed(Turn::assistant("Hello there")));
        assert!(update.is_terminal());

        assert_eq!(c.turns().last(), Some(&Turn::assistant("Hello there")));
        assert_eq!(c.conversation_id(), Some("abc"));
        assert_eq!(c.pending(), "");
        assert!(!c.is_in_flight());
    }

    #[test]
    fn test_final_content_wins_over_deltas() {
        let mut c = started();
        for piece in ["a", "b", "c", "d"] {
            c.apply(delta(piece));
        }
        c.apply(final_output("something else", None));

        let assistant: Vec<&Turn> = c
            .turns()
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .collect();
        assert_eq!(assistant.len(), 1);
        assert_eq!(assistant[0].content, "something else");
    }

    #[test]
    fn test_conversation_id_reused_and_not_overwritten() {
        let mut c = started();
        c.apply(final_output("one", Some("abc")));

        let request = c.submit("again").unwrap();
        assert_eq!(request.conversation_id.as_deref(), Some("abc"));
        assert_eq!(request.agent_id, "agent-1");
        assert_eq!(request.input, "again");

        c.apply(final_output("two", Some("other")));
        assert_eq!(c.conversation_id(), Some("abc"));
    }

    #[test]
    fn test_first_request_has_no_conversation() {
        let mut c = Conversation::new("agent-1", StepRetention::Conversation);
        let request = c.submit("hi").unwrap();
        assert_eq!(request.conversation_id, None);
        assert_eq!(c.turns(), &[Turn::user("hi")]);
    }

    #[test]
    fn test_malformed_frame_does_not_end_turn() {
        let mut c = started();
        c.apply(delta("x"));
        assert!(matches!(
            c.apply(SessionEvent::Frame("{oops".to_string())),
            Update::Skipped(_)
        ));
        assert!(c.is_in_flight());
        assert_eq!(c.apply(delta("y")), Update::Delta("y".to_string()));
        assert_eq!(c.pending(), "xy");

        c.apply(final_output("done", None));
        assert_eq!(c.turns().len(), 2);
    }

    #[test]
    fn test_tool_steps_recorded_in_order() {
        let mut c = started();
        c.apply(frame(json!({
            "type": "run_item_stream_event",
            "data": {"item": {"type": "tool_call_item", "name": "get_weather", "args": {"city": "Paris"}}}
        })));
        c.apply(frame(json!({
            "type": "run_item_stream_event",
            "data": {"item": {"type": "tool_call_output_item", "name": "get_weather", "output": "sunny"}}
        })));
        c.apply(frame(json!({
            "type": "run_item_stream_event",
            "data": {"item": {"type": "message_output_item"}}
        })));

        let steps = c.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, StepKind::ToolCall);
        assert_eq!(steps[0].args, Some(json!({"city": "Paris"})));
        assert_eq!(steps[1].kind, StepKind::ToolOutput);
        assert_eq!(steps[1].output, Some(json!("sunny")));
    }

    #[test]
    fn test_step_retention() {
        let tool_call = || {
            frame(json!({
                "type": "run_item_stream_event",
                "data": {"item": {"type": "tool_call_item", "name": "t"}}
            }))
        };

        for (retention, expected) in [
            (StepRetention::Conversation, 2),
            (StepRetention::PerTurn, 1),
        ] {
            let mut c = Conversation::new("a", retention);
            for text in ["one", "two"] {
                c.submit(text).unwrap();
                c.apply(tool_call());
                c.apply(final_output("ok", None));
            }
            assert_eq!(c.steps().len(), expected, "{retention:?}");
        }
    }

    #[test]
    fn test_abrupt_close_appends_nothing() {
        let mut c = started();
        c.apply(delta("partial"));
        let update = c.apply(SessionEvent::Closed {
            code: Some(1006),
            reason: String::new(),
        });

        assert_eq!(
            update,
            Update::Failed(TurnError::ClosedEarly {
                code: Some(1006),
                reason: String::new()
            })
        );
        assert_eq!(c.turns(), &[Turn::user("hi")]);
        assert_eq!(c.pending(), "");
        assert!(!c.is_in_flight());
        assert!(c.last_error().is_some());
    }

    #[test]
    fn test_connect_failure_clears_flag() {
        let mut c = started();
        let update = c.apply(SessionEvent::Failed("refused".to_string()));
        assert_eq!(update, Update::Failed(TurnError::ConnectFailed("refused".to_string())));
        assert!(!c.is_in_flight());
        assert_eq!(c.turns().len(), 1);
    }

    #[test]
    fn test_remote_error_frame_ends_turn() {
        let mut c = started();
        let update = c.apply(frame(json!({"type": "error", "data": {"message": "boom"}})));
        assert_eq!(update, Update::Failed(TurnError::Remote("boom".to_string())));
        assert!(!c.is_in_flight());
    }

    #[test]
    fn test_unknown_frames_ignored() {
        let mut c = started();
        assert_eq!(
            c.apply(frame(json!({"type": "agent_updated_stream_event", "data": {}}))),
            Update::Ignored
        );
        assert!(c.is_in_flight());
    }

    #[test]
    fn test_submit_rejections() {
        let mut c = Conversation::new("a", StepRetention::Conversation);
        assert_eq!(c.submit("   "), Err(SubmitError::Empty));
        assert!(c.turns().is_empty());

        c.submit("first").unwrap();
        assert_eq!(c.submit("second"), Err(SubmitError::Busy("second".to_string())));
        assert_eq!(c.turns().len(), 1);
    }

    #[test]
    fn test_events_after_completion_are_ignored() {
        let mut c = started();
        c.apply(final_output("done", None));
        assert_eq!(
            c.apply(SessionEvent::Closed {
                code: Some(1000),
                reason: String::new()
            }),
            Update::Ignored
        );
        assert!(c.last_error().is_none());
        assert_eq!(c.turns().len(), 2);
    }

    #[test]
    fn test_cancel_and_reset() {
        let mut c = started();
        assert!(c.reset().is_err());
        c.apply(delta("x"));

        assert_eq!(c.cancel(), Some(Update::Failed(TurnError::Cancelled)));
        assert_eq!(c.cancel(), None);
        assert_eq!(c.pending(), "");

        c.reset().unwrap();
        assert!(c.turns().is_empty());
        assert_eq!(c.conversation_id(), None);
    }

    #[test]
    fn test_close_detail_message() {
        let err = TurnError::ClosedEarly {
            code: Some(1011),
            reason: "internal".to_string(),
        };
        assert_eq!(err.to_string(), "连接在回复完成前关闭（1011：internal）");
        let err = TurnError::ClosedEarly {
            code: None,
            reason: String::new(),
        };
        assert_eq!(err.to_string(), "连接在回复完成前关闭");
    }
}
