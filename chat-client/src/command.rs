//! 本地输入解析

use crate::error::{Result, SessionError};

pub const AUTH_USAGE: &str = "Usage: /auth <username> <secret> <display_name>";
pub const JOIN_USAGE: &str = "Usage: /join <channel_id>";
pub const RENAME_USAGE: &str = "Usage: /rename <display_name>";

pub const HELP_TEXT: &str = "\
Supported local commands:
  /auth <username> <secret> <display_name>: Authenticate with the server
  /join <channel_id>: Join a channel
  /rename <display_name>: Change display name
  /help: Print this help message";

/// 一行用户输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// 空行，忽略
    Blank,
    /// 以 `/` 开头的本地命令
    Command(LocalCommand),
    /// 聊天内容
    Chat(String),
}

/// 本地命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Auth {
        username: String,
        secret: String,
        display_name: String,
    },
    Join {
        channel_id: String,
    },
    Rename {
        display_name: String,
    },
    Help,
}

/// 解析一行输入，命令格式错误时返回 `SessionError::Usage`
pub fn parse_input(line: &str) -> Result<Input> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(Input::Blank);
    }
    if !line.starts_with('/') {
        return Ok(Input::Chat(line.to_string()));
    }

    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    let command = match (command.as_str(), args.as_slice()) {
        ("/auth", [username, secret, display_name]) => LocalCommand::Auth {
            username: username.to_string(),
            secret: secret.to_string(),
            display_name: display_name.to_string(),
        },
        ("/auth", _) => return Err(SessionError::usage(AUTH_USAGE)),
        ("/join", [channel_id]) => LocalCommand::Join {
            channel_id: channel_id.to_string(),
        },
        ("/join", _) => return Err(SessionError::usage(JOIN_USAGE)),
        ("/rename", [display_name]) => LocalCommand::Rename {
            display_name: display_name.to_string(),
        },
        ("/rename", _) => return Err(SessionError::usage(RENAME_USAGE)),
        ("/help", _) => LocalCommand::Help,
        (other, _) => {
            return Err(SessionError::usage(format!(
                "Unknown command: {other}. Type /help for a list of supported commands."
            )))
        }
    };

    Ok(Input::Command(command))
}
