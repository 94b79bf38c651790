//! 错误类型定义

use thiserror::Error;

use crate::message::MessageKind;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 解码错误
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// 必填字段为空
    #[error("{kind} message is missing its {field}")]
    MissingField {
        kind: MessageKind,
        field: &'static str,
    },

    /// 字段过长
    #[error("{field} too long: {len} chars (max: {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// 字段包含非法字符
    #[error("{field} contains invalid characters")]
    InvalidField { field: &'static str },

    /// 消息不可编码（例如无法识别的入站消息）
    #[error("{0} message cannot be encoded")]
    NotEncodable(MessageKind),

    /// 行过长
    #[error("Line too long: {len} bytes (max: {max})")]
    LineTooLong { len: usize, max: usize },

    /// 数据报格式错误
    #[error("Malformed datagram: {0}")]
    MalformedDatagram(&'static str),

    /// 地址解析失败
    #[error("Could not resolve address {0}")]
    AddressResolution(String),

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 重传耗尽仍未收到确认
    #[error("Message {id} not confirmed after {attempts} attempts")]
    ConfirmTimeout { id: u16, attempts: u32 },
}

impl ProtocolError {
    /// 是否为传输层故障（连接不可再用）
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ConnectionTimeout
                | ProtocolError::ConnectionClosed
                | ProtocolError::ConfirmTimeout { .. }
                | ProtocolError::AddressResolution(_)
        )
    }
}

/// 线路文本无法解析为完整消息
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 缺少字段
    #[error("{kind} is missing its {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    /// 关键字不匹配
    #[error("expected {expected}, found {found:?}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },

    /// REPLY 状态既不是 OK 也不是 NOK
    #[error("invalid reply status {0:?}")]
    InvalidReplyStatus(String),

    /// 消息不是合法的 UTF-8
    #[error("message is not valid UTF-8")]
    InvalidUtf8,
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
