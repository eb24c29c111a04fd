pub mod conversation;
pub mod driver;
pub mod interpreter;
pub mod session;

pub use conversation::{ChatError, Conversation, Phase, SubmitError, TurnError, Update};
pub use driver::Playground;
pub use interpreter::{interpret, FrameError, StreamEvent};
pub use session::{Connector, OpenRequest, Session, SessionEvent, WsConnector};
