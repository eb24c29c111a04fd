//! 每轮对话一条 WebSocket 连接。
//!
//! `Connector::open` 立即返回 [`Session`]，连接在后台任务里建立；
//! 握手完成后发送开场帧，之后收到的每一帧按到达顺序放进事件通道。
//! 连接失败、中途断开都以事件的形式送达，不会作为 `open` 的返回值。

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, API_KEY_HEADER};
use crate::types::OpeningFrame;

/// 打开一轮流式会话所需的全部信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub agent_id: String,
    pub input: String,
    pub conversation_id: Option<String>,
}

impl OpenRequest {
    pub fn opening_frame(&self) -> OpeningFrame {
        OpeningFrame {
            input: self.input.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }
}

/// 传输层事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 握手完成，开场帧已发出
    Opened,
    /// 一帧文本，尚未解析
    Frame(String),
    /// 连接没能建立
    Failed(String),
    /// 连接已关闭（对端关闭、传输错误或通道结束）
    Closed { code: Option<u16>, reason: String },
}

/// 一轮对话的流式连接句柄
pub struct Session {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    closed: bool,
}

impl Session {
    /// 由事件通道和取消令牌组装；传输实现负责往通道里写事件
    pub fn new(events: mpsc::UnboundedReceiver<SessionEvent>, cancel: CancellationToken) -> Self {
        Session {
            events,
            cancel,
            closed: false,
        }
    }

    /// 下一个事件；关闭后或通道结束时返回 `None`
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// 关闭连接，可重复调用
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// 流式传输的抽象，测试里可以换成脚本化实现。
///
/// `open` 是同步的，实现自己决定在哪里跑传输任务。
/// [`WsConnector`] 需要当前线程处在 Tokio 运行时里，否则返回的会话只带一个 `Failed` 事件。
pub trait Connector {
    fn open(&self, request: OpenRequest) -> Session;
}

/// 基于 tokio-tungstenite 的实现
#[derive(Clone)]
pub struct WsConnector {
    api: ApiClient,
}

impl WsConnector {
    pub fn new(api: ApiClient) -> Self {
        WsConnector { api }
    }
}

impl Connector for WsConnector {
    fn open(&self, request: OpenRequest) -> Session {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "no tokio runtime, stream not opened");
                let _ = tx.send(SessionEvent::Failed(format!("没有可用的 Tokio 运行时：{}", e)));
                return Session::new(rx, cancel);
            }
        };

        match self.api.stream_url(&request.agent_id) {
            Ok(url) => {
                let api_key = self.api.api_key().map(str::to_string);
                runtime.spawn(run_stream(
                    url.to_string(),
                    api_key,
                    self.api.timeout(),
                    request,
                    tx,
                    cancel.clone(),
                ));
            }
            Err(e) => {
                let _ = tx.send(SessionEvent::Failed(e.to_string()));
            }
        }

        Session::new(rx, cancel)
    }
}

async fn run_stream(
    url: String,
    api_key: Option<String>,
    connect_timeout: Duration,
    request: OpenRequest,
    tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut ws_request = match url.as_str().into_client_request() {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.send(SessionEvent::Failed(e.to_string()));
            return;
        }
    };
    if let Some(key) = api_key {
        match (
            HeaderName::from_bytes(API_KEY_HEADER.as_bytes()),
            HeaderValue::from_str(&key),
        ) {
            (Ok(name), Ok(value)) => {
                ws_request.headers_mut().insert(name, value);
            }
            _ => warn!("api key is not a valid header value, sending without it"),
        }
    }

    info!(%url, agent_id = %request.agent_id, "opening stream");
    let handshake = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::connect_async(ws_request),
    );
    let connect = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("stream cancelled before connect");
            return;
        }
        result = handshake => result,
    };
    let (mut ws, _) = match connect {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!(%url, error = %e, "stream connect failed");
            let _ = tx.send(SessionEvent::Failed(e.to_string()));
            return;
        }
        Err(_) => {
            warn!(%url, ?connect_timeout, "stream handshake timed out");
            let _ = tx.send(SessionEvent::Failed(format!(
                "连接超时（{} 秒）",
                connect_timeout.as_secs()
            )));
            return;
        }
    };

    let opening = match serde_json::to_string(&request.opening_frame()) {
        Ok(text) => text,
        Err(e) => {
            let _ = tx.send(SessionEvent::Failed(e.to_string()));
            let _ = ws.close(None).await;
            return;
        }
    };
    if let Err(e) = ws.send(Message::Text(opening)).await {
        warn!(error = %e, "failed to send opening frame");
        let _ = tx.send(SessionEvent::Failed(e.to_string()));
        return;
    }
    let _ = tx.send(SessionEvent::Opened);

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("stream closed by caller");
                let _ = ws.close(None).await;
                return;
            }
            message = ws.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if tx.send(SessionEvent::Frame(text)).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if tx.send(SessionEvent::Frame(text)).is_err() {
                        break;
                    }
                }
                Err(_) => warn!("dropping non-utf8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                    None => (None, String::new()),
                };
                debug!(?code, %reason, "stream closed by server");
                let _ = tx.send(SessionEvent::Closed { code, reason });
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "stream transport error");
                let _ = tx.send(SessionEvent::Closed {
                    code: None,
                    reason: e.to_string(),
                });
                return;
            }
            None => {
                let _ = tx.send(SessionEvent::Closed {
                    code: None,
                    reason: String::new(),
                });
                return;
            }
        }
    }

    let _ = ws.close(None).await;
}
