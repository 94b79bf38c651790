//! 会话错误类型

use protocol::ProtocolError;
use thiserror::Error;

/// 会话层错误
#[derive(Error, Debug)]
pub enum SessionError {
    /// 本地命令格式错误等，报告后继续
    #[error("{0}")]
    Usage(String),

    /// 认证前发送聊天消息，进程退出
    #[error("You need to authenticate first. Use /auth command.")]
    AuthRequired,

    /// 尚未连接服务器
    #[error("Not connected to the server")]
    NotConnected,

    /// 后台接收路径遇到传输故障
    #[error("Session terminated after a transport fault")]
    TransportFault,

    /// 协议层错误
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    pub fn usage(message: impl Into<String>) -> Self {
        SessionError::Usage(message.into())
    }

    /// 是否需要结束会话
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Usage(_) => false,
            SessionError::AuthRequired
            | SessionError::NotConnected
            | SessionError::TransportFault => true,
            SessionError::Protocol(e) => e.is_transport_fault(),
        }
    }
}

/// 会话操作结果类型
pub type Result<T> = std::result::Result<T, SessionError>;
