mod agent;
mod backend;
mod stream;

pub use agent::{AgentDraft, AgentRecord, ToolConfig, ToolKind, ValidationError, DEFAULT_MODEL};
pub use backend::{HealthState, HealthStatus, MessageItem, RunRequest, RunResponse};
pub use stream::{ExecutionStep, OpeningFrame, Role, StepKind, Turn};
