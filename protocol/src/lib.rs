//! IPK24-CHAT 共享协议库
//!
//! 包含:
//! - 消息类型定义 (Message, MessageKind)
//! - 文本编解码与行分帧 (Codec)
//! - 数据报封装 (Datagram)
//! - 传输层抽象 (Transport trait, TCP / UDP 实现)

mod codec;
mod constants;
mod datagram;
mod error;
mod message;
mod transport;

pub use codec::{decode, encode, LineReader, LineWriter, LINE_TERMINATOR};
pub use constants::*;
pub use datagram::Datagram;
pub use error::{DecodeError, ProtocolError, Result};
pub use message::{Message, MessageKind};
pub use transport::{
    MessageSink, MessageSource, TcpTransport, Transport, TransportConfig, UdpReceiver, UdpSender,
    UdpTransport,
};
