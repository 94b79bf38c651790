//! 终端输出
//!
//! 聊天消息和提示写到 stdout，回复与错误写到 stderr。

use std::io;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::client::ClientEvent;

/// 输出目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stdout,
    Stderr,
}

/// 将事件格式化为一行文本
pub fn render(event: &ClientEvent) -> (Target, String) {
    match event {
        ClientEvent::Chat {
            display_name,
            content,
        } => (Target::Stdout, format!("{display_name}: {content}")),
        ClientEvent::ServerError {
            display_name,
            content,
        } => (Target::Stderr, format!("ERR FROM {display_name}: {content}")),
        ClientEvent::Reply {
            success: true,
            content,
        } => (Target::Stderr, format!("Success: {content}")),
        ClientEvent::Reply {
            success: false,
            content,
        } => (Target::Stderr, format!("Failure: {content}")),
        ClientEvent::LocalError { message } => (Target::Stderr, format!("ERR: {message}")),
        ClientEvent::Info { message } => (Target::Stdout, message.clone()),
    }
}

/// 打印事件直到所有发送端关闭
pub async fn print_events(mut events: mpsc::UnboundedReceiver<ClientEvent>) -> io::Result<()> {
    while let Some(event) = events.recv().await {
        match render(&event) {
            (Target::Stdout, line) => write_stdout(&line).await?,
            (Target::Stderr, line) => write_stderr(&line).await?,
        }
    }
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
