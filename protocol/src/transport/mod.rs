//! 传输层抽象
//!
//! 提供 Transport trait 使会话逻辑与具体传输实现解耦：
//! TCP 上每条消息是一行文本，UDP 上每条消息是一个带确认的数据报。

mod tcp;
mod udp;

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::message::Message;
use crate::{CONNECT_TIMEOUT, DEFAULT_CONFIRM_TIMEOUT, DEFAULT_MAX_RETRANSMISSIONS};

pub use tcp::TcpTransport;
pub use udp::{UdpReceiver, UdpSender, UdpTransport};

/// 传输层配置
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// 连接超时时间
    pub connect_timeout: Duration,
    /// 是否禁用 Nagle 算法（TCP nodelay）
    pub nodelay: bool,
    /// 等待 UDP 确认的时间
    pub confirm_timeout: Duration,
    /// UDP 最大重传次数（不含首次发送）
    pub max_retransmissions: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            nodelay: true,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
        }
    }
}

/// 传输层抽象 trait
///
/// 定义了客户端连接和收发分离的基本操作。
pub trait Transport: Send + Sized + 'static {
    /// 发送端类型
    type Sink: MessageSink;
    /// 接收端类型
    type Source: MessageSource;

    /// 建立连接
    ///
    /// # Arguments
    /// * `addr` - 服务器地址，格式为 "host:port"
    /// * `config` - 传输配置
    fn connect(addr: &str, config: &TransportConfig) -> impl Future<Output = Result<Self>> + Send;

    /// 分离发送端和接收端，便于后台任务独立接收
    fn split(self) -> (Self::Sink, Self::Source);
}

/// 消息发送端
pub trait MessageSink: Send + 'static {
    /// 发送一条消息，返回时消息已经写出（UDP 下已被确认）
    fn send(&mut self, msg: &Message) -> impl Future<Output = Result<()>> + Send;

    /// 关闭发送端并释放底层资源
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// 消息接收端
pub trait MessageSource: Send + 'static {
    /// 接收下一条消息
    ///
    /// 对端关闭或传输结束时返回 `Ok(None)`。
    fn recv(&mut self) -> impl Future<Output = Result<Option<Message>>> + Send;
}
