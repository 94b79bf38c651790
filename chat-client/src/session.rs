//! 会话状态机

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 初始化前
    Start,
    /// 等待认证成功
    Auth,
    /// 已认证，可以聊天
    Open,
    /// 出现不可恢复的故障
    Error,
    /// 会话结束
    End,
}

impl SessionState {
    /// 控制循环在此状态下停止
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Error | SessionState::End)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 会话状态机
///
/// 状态保存在单个 watch 通道中，前台控制循环和后台接收任务
/// 都只能通过 `transition_to` 修改状态，订阅者会收到每次变更。
/// 不校验转换是否合法，由调用方保证。
#[derive(Clone, Debug)]
pub struct StateMachine {
    tx: Arc<watch::Sender<SessionState>>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Start);
        Self { tx: Arc::new(tx) }
    }

    /// 无条件转换到新状态
    pub fn transition_to(&self, state: SessionState) {
        let previous = self.tx.send_replace(state);
        debug!("Session state {} -> {}", previous, state);
    }

    /// 当前状态
    pub fn current_state(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// 订阅状态变更
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
