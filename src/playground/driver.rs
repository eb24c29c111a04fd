use tracing::info;

use crate::types::Turn;

use super::conversation::{ChatError, Conversation, SubmitError, TurnError, Update};
use super::session::{Connector, Session, SessionEvent};

/// 把视图模型和传输连起来：每轮打开一个会话，逐个投递事件
pub struct Playground<C: Connector> {
    conversation: Conversation,
    connector: C,
    session: Option<Session>,
}

impl<C: Connector> Playground<C> {
    pub fn new(conversation: Conversation, connector: C) -> Self {
        Playground {
            conversation,
            connector,
            session: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// 提交一轮并打开会话；用 [`WsConnector`](super::WsConnector) 时需在 Tokio 运行时内调用
    pub fn submit(&mut self, text: &str) -> Result<(), SubmitError> {
        let request = self.conversation.submit(text)?;
        info!(
            agent_id = %request.agent_id,
            conversation_id = ?request.conversation_id,
            "sending turn"
        );
        self.session = Some(self.connector.open(request));
        Ok(())
    }

    /// 等待并处理下一个事件；没有进行中的会话时返回 `None`
    pub async fn next_update(&mut self) -> Option<Update> {
        let session = self.session.as_mut()?;
        let event = session.recv().await.unwrap_or(SessionEvent::Closed {
            code: None,
            reason: String::new(),
        });

        let update = self.conversation.apply(event);
        if update.is_terminal() || !self.conversation.is_in_flight() {
            self.end_session();
        }
        Some(update)
    }

    /// 发送一轮并驱动到结束，每次变化都回调 `on_update`
    pub async fn run_turn<F>(&mut self, text: &str, mut on_update: F) -> Result<Turn, ChatError>
    where
        F: FnMut(&Update, &Conversation),
    {
        self.submit(text)?;

        while let Some(update) = self.next_update().await {
            on_update(&update, &self.conversation);
            match update {
                Update::Completed(turn) => return Ok(turn),
                Update::Failed(error) => return Err(error.into()),
                _ => {}
            }
        }

        Err(TurnError::ClosedEarly {
            code: None,
            reason: String::new(),
        }
        .into())
    }

    /// 用户中断：关闭连接并结束本轮
    pub fn cancel(&mut self) -> Option<Update> {
        self.end_session();
        self.conversation.cancel()
    }

    pub fn reset(&mut self) -> Result<(), SubmitError> {
        self.conversation.reset()
    }

    fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

impl<C: Connector> Drop for Playground<C> {
    fn drop(&mut self) {
        self.end_session();
    }
}
