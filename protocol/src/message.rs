//! 消息类型定义

use std::fmt;

use crate::error::{ProtocolError, Result};
use crate::{
    MAX_CHANNEL_ID_LEN, MAX_CONTENT_LEN, MAX_DISPLAY_NAME_LEN, MAX_SECRET_LEN, MAX_USERNAME_LEN,
};

/// 消息种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Auth,
    Join,
    Msg,
    Err,
    ReplyOk,
    ReplyNok,
    Bye,
    /// 解码时遇到无法识别的首个关键字
    Unknown,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Auth => "AUTH",
            MessageKind::Join => "JOIN",
            MessageKind::Msg => "MSG",
            MessageKind::Err => "ERR",
            MessageKind::ReplyOk => "REPLY OK",
            MessageKind::ReplyNok => "REPLY NOK",
            MessageKind::Bye => "BYE",
            MessageKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// IPK24-CHAT 消息
///
/// 每个变体只携带该种类需要的字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// 认证请求
    Auth {
        username: String,
        display_name: String,
        secret: String,
    },
    /// 加入频道
    Join {
        channel_id: String,
        display_name: String,
    },
    /// 聊天消息
    Msg {
        display_name: String,
        content: String,
    },
    /// 错误消息
    Err {
        display_name: String,
        content: String,
    },
    /// 对 AUTH / JOIN 的回复
    Reply { ok: bool, content: String },
    /// 结束会话
    Bye,
    /// 无法识别的消息，只能显示，不能再编码
    Unknown { raw: String },
}

impl Message {
    pub fn auth(
        username: impl Into<String>,
        display_name: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Message::Auth {
            username: username.into(),
            display_name: display_name.into(),
            secret: secret.into(),
        }
    }

    pub fn join(channel_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Message::Join {
            channel_id: channel_id.into(),
            display_name: display_name.into(),
        }
    }

    pub fn msg(display_name: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Msg {
            display_name: display_name.into(),
            content: content.into(),
        }
    }

    pub fn err(display_name: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Err {
            display_name: display_name.into(),
            content: content.into(),
        }
    }

    pub fn reply(ok: bool, content: impl Into<String>) -> Self {
        Message::Reply {
            ok,
            content: content.into(),
        }
    }

    /// 消息种类
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Auth { .. } => MessageKind::Auth,
            Message::Join { .. } => MessageKind::Join,
            Message::Msg { .. } => MessageKind::Msg,
            Message::Err { .. } => MessageKind::Err,
            Message::Reply { ok: true, .. } => MessageKind::ReplyOk,
            Message::Reply { ok: false, .. } => MessageKind::ReplyNok,
            Message::Bye => MessageKind::Bye,
            Message::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// 校验消息内容是否符合约束
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            Message::Auth {
                username,
                display_name,
                secret,
            } => {
                check_id(kind, "username", username, MAX_USERNAME_LEN)?;
                check_display_name(kind, display_name)?;
                check_id(kind, "secret", secret, MAX_SECRET_LEN)?;
            }
            Message::Join {
                channel_id,
                display_name,
            } => {
                check_id(kind, "channel id", channel_id, MAX_CHANNEL_ID_LEN)?;
                check_display_name(kind, display_name)?;
            }
            Message::Msg {
                display_name,
                content,
            }
            | Message::Err {
                display_name,
                content,
            } => {
                check_display_name(kind, display_name)?;
                check_content(kind, content)?;
            }
            Message::Reply { content, .. } => check_content(kind, content)?,
            Message::Bye => {}
            Message::Unknown { .. } => return Err(ProtocolError::NotEncodable(kind)),
        }
        Ok(())
    }
}

fn check_present(kind: MessageKind, field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ProtocolError::MissingField { kind, field });
    }
    Ok(())
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(ProtocolError::FieldTooLong { field, len, max });
    }
    Ok(())
}

/// 用户名、频道 ID 和密钥：字母数字及 `-` `_` `.`
fn check_id(kind: MessageKind, field: &'static str, value: &str, max: usize) -> Result<()> {
    check_present(kind, field, value)?;
    check_len(field, value, max)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ProtocolError::InvalidField { field });
    }
    Ok(())
}

/// 显示名：不含空格的可打印 ASCII
fn check_display_name(kind: MessageKind, value: &str) -> Result<()> {
    check_present(kind, "display name", value)?;
    check_len("display name", value, MAX_DISPLAY_NAME_LEN)?;
    if !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ProtocolError::InvalidField {
            field: "display name",
        });
    }
    Ok(())
}

/// 内容：不能包含控制字符（CR/LF 会破坏分行）
fn check_content(kind: MessageKind, value: &str) -> Result<()> {
    check_present(kind, "content", value)?;
    check_len("content", value, MAX_CONTENT_LEN)?;
    if value.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidField { field: "content" });
    }
    Ok(())
}
