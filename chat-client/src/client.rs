//! 聊天客户端核心实现
//!
//! `ChatClient` 对 TCP 和 UDP 两种传输提供相同的会话操作。
//! 认证成功后，入站方向交给后台接收任务；此后 JOIN 的即时回复
//! 由后台任务通过一次性回复槽转交，避免两个读取者争抢同一条消息。

use std::sync::Arc;

use protocol::{Message, MessageSink, MessageSource, ProtocolError, Transport, TransportConfig};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::session::{SessionState, StateMachine};

/// 客户端发送给终端的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// 收到聊天消息
    Chat {
        display_name: String,
        content: String,
    },
    /// 服务器发来的 ERR
    ServerError {
        display_name: String,
        content: String,
    },
    /// AUTH / JOIN 的回复
    Reply { success: bool, content: String },
    /// 本地错误
    LocalError { message: String },
    /// 提示信息
    Info { message: String },
}

impl ClientEvent {
    pub fn local_error(message: impl Into<String>) -> Self {
        ClientEvent::LocalError {
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        ClientEvent::Info {
            message: message.into(),
        }
    }

    /// 将入站消息转换为终端事件，BYE 没有对应事件
    fn from_message(msg: Message) -> Option<Self> {
        let event = match msg {
            Message::Msg {
                display_name,
                content,
            } => ClientEvent::Chat {
                display_name,
                content,
            },
            Message::Err {
                display_name,
                content,
            } => ClientEvent::ServerError {
                display_name,
                content,
            },
            Message::Reply { ok, content } => ClientEvent::Reply {
                success: ok,
                content,
            },
            Message::Bye => return None,
            Message::Unknown { raw } => {
                ClientEvent::local_error(format!("Unknown message from server: {raw}"))
            }
            other => ClientEvent::local_error(format!("Unexpected {} from server", other.kind())),
        };
        Some(event)
    }
}

/// 认证结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// REPLY OK，会话进入 Open
    Accepted,
    /// REPLY NOK，可以重试
    Rejected,
    /// ERR 或协议违例，会话结束
    Fatal,
}

/// 加入频道结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Refused,
}

/// 等待即时回复的一次性槽位
type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Message>>>>;

/// 后台接收任务
struct ReceiverTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// 聊天客户端
pub struct ChatClient<T: Transport> {
    /// 服务器地址
    addr: String,
    config: TransportConfig,
    sink: Option<T::Sink>,
    /// 后台接收任务启动后为 None
    source: Option<T::Source>,
    /// 当前显示名
    display_name: String,
    fsm: StateMachine,
    events: mpsc::UnboundedSender<ClientEvent>,
    pending_reply: ReplySlot,
    receiver: Option<ReceiverTask>,
}

impl<T: Transport> ChatClient<T> {
    pub fn new(
        addr: impl Into<String>,
        config: TransportConfig,
        fsm: StateMachine,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            addr: addr.into(),
            config,
            sink: None,
            source: None,
            display_name: String::new(),
            fsm,
            events,
            pending_reply: Arc::new(Mutex::new(None)),
            receiver: None,
        }
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.fsm
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    /// 连接服务器，已连接时直接返回
    pub async fn connect(&mut self) -> Result<()> {
        if self.sink.is_some() {
            return Ok(());
        }

        info!("Connecting to {}", self.addr);
        let transport = T::connect(&self.addr, &self.config).await?;
        let (sink, source) = transport.split();
        self.sink = Some(sink);
        self.source = Some(source);
        info!("Connected to {}", self.addr);

        Ok(())
    }

    /// 认证，并执行一次接收等待即时回复
    pub async fn authenticate(
        &mut self,
        username: &str,
        secret: &str,
        display_name: &str,
    ) -> Result<AuthOutcome> {
        self.connect().await?;
        self.send(&Message::auth(username, display_name, secret))
            .await?;

        let reply = match self.receive_one().await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.fsm.transition_to(SessionState::Error);
                return Err(ProtocolError::ConnectionClosed.into());
            }
            Err(e) if e.is_fatal() => {
                self.fsm.transition_to(SessionState::Error);
                return Err(e);
            }
            Err(e) => {
                self.emit(ClientEvent::local_error(format!(
                    "Invalid reply from server: {e}"
                )));
                self.fsm.transition_to(SessionState::Error);
                return Ok(AuthOutcome::Fatal);
            }
        };

        match reply {
            Message::Reply { ok: true, content } => {
                self.display_name = display_name.to_string();
                self.emit(ClientEvent::Reply {
                    success: true,
                    content,
                });
                self.fsm.transition_to(SessionState::Open);
                self.start_receiver();
                info!("Authenticated as {}", display_name);
                Ok(AuthOutcome::Accepted)
            }
            Message::Reply { ok: false, content } => {
                self.emit(ClientEvent::Reply {
                    success: false,
                    content,
                });
                Ok(AuthOutcome::Rejected)
            }
            Message::Err {
                display_name,
                content,
            } => {
                self.emit(ClientEvent::ServerError {
                    display_name,
                    content,
                });
                self.fsm.transition_to(SessionState::End);
                Ok(AuthOutcome::Fatal)
            }
            Message::Bye => {
                info!("Server ended the session during authentication");
                self.fsm.transition_to(SessionState::End);
                Ok(AuthOutcome::Fatal)
            }
            other => {
                self.emit(ClientEvent::local_error(format!(
                    "Unexpected {} while authenticating",
                    other.kind()
                )));
                self.fsm.transition_to(SessionState::Error);
                Ok(AuthOutcome::Fatal)
            }
        }
    }

    /// 加入频道，等待即时回复，不改变会话状态
    ///
    /// 后台接收任务尚未启动时直接在前台读取回复。
    pub async fn join_channel(&mut self, channel_id: &str) -> Result<JoinOutcome> {
        let msg = Message::join(channel_id, self.display_name.clone());

        let reply = if self.receiver.is_some() {
            // 后台任务拥有入站方向，回复经由槽位转交
            let (reply_tx, reply_rx) = oneshot::channel();
            *self.pending_reply.lock().await = Some(reply_tx);
            if let Err(e) = self.send(&msg).await {
                self.pending_reply.lock().await.take();
                return Err(e);
            }
            reply_rx.await.map_err(|_| SessionError::TransportFault)?
        } else {
            self.send(&msg).await?;
            match self.receive_one().await? {
                Some(reply) => reply,
                None => {
                    self.fsm.transition_to(SessionState::Error);
                    return Err(ProtocolError::ConnectionClosed.into());
                }
            }
        };

        match reply {
            Message::Reply { ok, content } => {
                debug!("JOIN {} answered: ok={}", channel_id, ok);
                self.emit(ClientEvent::Reply {
                    success: ok,
                    content,
                });
                Ok(if ok {
                    JoinOutcome::Joined
                } else {
                    JoinOutcome::Refused
                })
            }
            other => {
                if let Some(event) = ClientEvent::from_message(other) {
                    self.emit(event);
                }
                self.emit(ClientEvent::local_error(format!(
                    "No reply to joining {channel_id}"
                )));
                Ok(JoinOutcome::Refused)
            }
        }
    }

    /// 以当前显示名发送聊天消息，仅在 Open 状态下允许
    pub async fn send_chat_message(&mut self, content: &str) -> Result<()> {
        if self.fsm.current_state() != SessionState::Open {
            return Err(SessionError::AuthRequired);
        }
        let msg = Message::msg(self.display_name.clone(), content);
        self.send(&msg).await
    }

    /// 修改显示名，任何状态下都可以调用
    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        debug!("Display name set to {}", self.display_name);
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// 发送任意消息；传输故障会使会话进入 Error
    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(SessionError::NotConnected)?;
        debug!("Sending {}", msg.kind());

        if let Err(e) = sink.send(msg).await {
            if e.is_transport_fault() {
                self.fsm.transition_to(SessionState::Error);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// 在前台接收一条消息
    ///
    /// 对端关闭时返回 `Ok(None)`。后台接收任务运行后入站方向不再可用。
    pub async fn receive_one(&mut self) -> Result<Option<Message>> {
        if self.receiver.is_some() {
            return Err(SessionError::usage(
                "Inbound messages are handled by the background receiver",
            ));
        }
        let source = self.source.as_mut().ok_or(SessionError::NotConnected)?;
        Ok(source.recv().await?)
    }

    /// 停止后台接收任务并关闭连接，可以重复调用
    pub async fn disconnect(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.shutdown.send(true);
            if let Err(e) = receiver.handle.await {
                warn!("Receive task failed: {}", e);
            }
        }

        self.source = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                warn!("Failed to close connection cleanly: {}", e);
            }
            info!("Disconnected from {}", self.addr);
        }
    }

    fn start_receiver(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(receive_loop(
            source,
            self.fsm.clone(),
            self.events.clone(),
            Arc::clone(&self.pending_reply),
            shutdown_rx,
        ));
        self.receiver = Some(ReceiverTask {
            shutdown: shutdown_tx,
            handle,
        });
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// 后台接收循环
///
/// BYE 使会话进入 End，传输故障或对端关闭使会话进入 Error，
/// 其余消息交给终端显示。
async fn receive_loop<S: MessageSource>(
    mut source: S,
    fsm: StateMachine,
    events: mpsc::UnboundedSender<ClientEvent>,
    pending_reply: ReplySlot,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            received = source.recv() => received,
        };

        match received {
            Ok(Some(Message::Bye)) => {
                info!("Server ended the session");
                fsm.transition_to(SessionState::End);
                break;
            }
            Ok(Some(reply @ Message::Reply { .. })) => {
                let waiter = pending_reply.lock().await.take();
                let unclaimed = match waiter {
                    Some(waiter) => waiter.send(reply).err(),
                    None => Some(reply),
                };
                if let Some(event) = unclaimed.and_then(ClientEvent::from_message) {
                    let _ = events.send(event);
                }
            }
            Ok(Some(msg)) => {
                debug!("Received {}", msg.kind());
                if let Some(event) = ClientEvent::from_message(msg) {
                    let _ = events.send(event);
                }
            }
            Ok(None) => {
                if *shutdown.borrow() {
                    break;
                }
                warn!("Server closed the connection");
                let _ = events.send(ClientEvent::local_error("Connection closed by server"));
                fsm.transition_to(SessionState::Error);
                break;
            }
            Err(e) if e.is_transport_fault() => {
                warn!("Receive error: {}", e);
                let _ = events.send(ClientEvent::local_error(e.to_string()));
                fsm.transition_to(SessionState::Error);
                break;
            }
            Err(e) => {
                warn!("Ignoring malformed message: {}", e);
                let _ = events.send(ClientEvent::local_error(format!(
                    "Invalid message from server: {e}"
                )));
            }
        }
    }

    // 释放等待中的 JOIN
    pending_reply.lock().await.take();
    debug!("Receive loop stopped");
}
