//! 数据报封装
//!
//! 数据报格式:
//! ```text
//! ┌──────────┬────────────────┬──────────────────────────────────┐
//! │ Type(1B) │ MessageID (2B) │  Payload (仅 DATA，UTF-8 消息行)  │
//! │    u8    │    u16 BE      │  不含 CRLF                        │
//! └──────────┴────────────────┴──────────────────────────────────┘
//! ```
//!
//! CONFIRM 只有头部，用于确认收到相同 ID 的 DATA。

use crate::codec;
use crate::error::{ProtocolError, Result};
use crate::message::Message;

/// 头部大小: 1 字节类型 + 2 字节消息 ID
pub const HEADER_SIZE: usize = 3;

const TYPE_CONFIRM: u8 = 0x00;
const TYPE_DATA: u8 = 0x01;

/// 单个数据报
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// 确认收到指定 ID 的 DATA
    Confirm { id: u16 },
    /// 携带一行已编码的消息
    Data { id: u16, payload: String },
}

impl Datagram {
    /// 为消息构造 DATA 数据报
    pub fn data(id: u16, msg: &Message) -> Result<Self> {
        Ok(Datagram::Data {
            id,
            payload: codec::encode(msg)?,
        })
    }

    pub fn id(&self) -> u16 {
        match self {
            Datagram::Confirm { id } | Datagram::Data { id, .. } => *id,
        }
    }

    /// 序列化为字节
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Datagram::Confirm { id } => {
                let mut buf = Vec::with_capacity(HEADER_SIZE);
                buf.push(TYPE_CONFIRM);
                buf.extend_from_slice(&id.to_be_bytes());
                buf
            }
            Datagram::Data { id, payload } => {
                let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
                buf.push(TYPE_DATA);
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(payload.as_bytes());
                buf
            }
        }
    }

    /// 只读取头部：DATA 数据报返回其 ID，即使负载无法解析
    pub fn data_id(buf: &[u8]) -> Option<u16> {
        match buf {
            [TYPE_DATA, hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// 从字节解析
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedDatagram("shorter than header"));
        }
        let id = u16::from_be_bytes([buf[1], buf[2]]);

        match buf[0] {
            TYPE_CONFIRM => Ok(Datagram::Confirm { id }),
            TYPE_DATA => {
                let payload = std::str::from_utf8(&buf[HEADER_SIZE..])
                    .map_err(|_| ProtocolError::MalformedDatagram("payload is not UTF-8"))?;
                Ok(Datagram::Data {
                    id,
                    payload: payload.to_string(),
                })
            }
            _ => Err(ProtocolError::MalformedDatagram("unknown datagram type")),
        }
    }
}
