//! 会话控制循环
//!
//! 逐行读取本地输入并分派到 `ChatClient`。会话进入 End 或 Error、
//! 输入结束或遇到致命错误时退出循环，随后发送 BYE 并断开连接。

use protocol::{Message, ProtocolError, Transport};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{AuthOutcome, ChatClient, ClientEvent};
use crate::command::{parse_input, Input, LocalCommand, HELP_TEXT};
use crate::error::{Result, SessionError};
use crate::session::{SessionState, StateMachine};

/// 会话控制器
pub struct SessionControl<T: Transport> {
    client: ChatClient<T>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<T: Transport> SessionControl<T> {
    pub fn new(client: ChatClient<T>, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { client, events }
    }

    /// 运行整个会话，返回时连接已关闭
    ///
    /// 致命错误以 `Err` 返回，由调用方决定如何结束进程。
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        let fsm = self.client.state_machine().clone();
        fsm.transition_to(SessionState::Auth);

        let result = match self.client.connect().await {
            Ok(()) => self.drive(input, &fsm).await,
            Err(e) => Err(e),
        };

        self.teardown(&fsm).await;
        result
    }

    async fn drive<R: AsyncBufRead + Unpin>(&mut self, input: R, fsm: &StateMachine) -> Result<()> {
        let mut lines = input.lines();
        let mut state_rx = fsm.subscribe();

        loop {
            let state = fsm.current_state();
            if state.is_terminal() {
                debug!("Leaving control loop in state {}", state);
                return match state {
                    SessionState::Error => Err(SessionError::TransportFault),
                    _ => Ok(()),
                };
            }

            // 阻塞读取输入的同时关注后台任务或中断引起的状态变化
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = state_rx.changed() => continue,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("End of input");
                    fsm.transition_to(SessionState::End);
                    continue;
                }
                Err(e) => return Err(ProtocolError::Io(e).into()),
            };

            // 等待 AUTH / JOIN 回复时也要响应中断
            let handled = tokio::select! {
                biased;

                handled = self.handle_line(&line, fsm) => handled,
                _ = state_rx.wait_for(|state| state.is_terminal()) => {
                    debug!("Session ended while handling input");
                    continue;
                }
            };

            if let Err(e) = handled {
                if e.is_fatal() {
                    return Err(e);
                }
                self.emit(ClientEvent::local_error(e.to_string()));
            }
        }
    }

    async fn handle_line(&mut self, line: &str, fsm: &StateMachine) -> Result<()> {
        match parse_input(line)? {
            Input::Blank => Ok(()),
            Input::Command(command) => self.handle_command(command, fsm).await,
            Input::Chat(content) => {
                if fsm.current_state() != SessionState::Open {
                    return Err(SessionError::AuthRequired);
                }
                self.client.send_chat_message(&content).await
            }
        }
    }

    async fn handle_command(&mut self, command: LocalCommand, fsm: &StateMachine) -> Result<()> {
        match command {
            LocalCommand::Auth {
                username,
                secret,
                display_name,
            } => {
                if fsm.current_state() != SessionState::Auth {
                    return Err(SessionError::usage("You are already authenticated"));
                }
                let outcome = self
                    .client
                    .authenticate(&username, &secret, &display_name)
                    .await?;
                if outcome == AuthOutcome::Rejected {
                    debug!("Authentication rejected, waiting for another /auth");
                }
                Ok(())
            }
            LocalCommand::Join { channel_id } => {
                if fsm.current_state() != SessionState::Open {
                    return Err(SessionError::usage(
                        "You need to authenticate before joining a channel",
                    ));
                }
                self.client.join_channel(&channel_id).await?;
                Ok(())
            }
            LocalCommand::Rename { display_name } => {
                self.client.set_display_name(display_name);
                Ok(())
            }
            LocalCommand::Help => {
                self.emit(ClientEvent::info(HELP_TEXT));
                Ok(())
            }
        }
    }

    /// 发送 BYE 并断开，无论从哪条路径结束都只执行一次
    async fn teardown(&mut self, fsm: &StateMachine) {
        if self.client.is_connected() {
            if let Err(e) = self.client.send(&Message::Bye).await {
                warn!("Failed to send BYE: {}", e);
            }
        }
        self.client.disconnect().await;

        if !fsm.current_state().is_terminal() {
            fsm.transition_to(SessionState::End);
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{TcpTransport, TransportConfig};
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// 模拟服务端：对 AUTH 回复 `auth_reply`，其后的 `extra` 原样写出，
    /// 返回 AUTH 之后收到的所有行
    async fn mock_server(auth_reply: &'static str, extra: &'static str) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut lines = Vec::new();

            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                if line.starts_with("AUTH") {
                    writer.write_all(auth_reply.as_bytes()).await.unwrap();
                    writer.write_all(extra.as_bytes()).await.unwrap();
                } else {
                    lines.push(line);
                }
            }
            lines
        });

        (addr, handle)
    }

    fn session(addr: &str) -> (SessionControl<TcpTransport>, StateMachine, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let fsm = StateMachine::new();
        let client = ChatClient::new(addr, TransportConfig::default(), fsm.clone(), events_tx.clone());
        (SessionControl::new(client, events_tx), fsm, events_rx)
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test]
    async fn test_chat_flow_with_rename() {
        let (addr, server) = mock_server("REPLY OK IS Welcome\r\n", "").await;
        let (mut control, fsm, _events) = session(&addr);

        let input: &[u8] = b"/auth alice secret1 Alice\nhello\n\n/rename Bobby\nagain\n";
        timeout(WAIT, control.run(input)).await.unwrap().unwrap();

        assert_eq!(fsm.current_state(), SessionState::End);
        assert_eq!(
            server.await.unwrap(),
            vec![
                "MSG FROM Alice IS hello\r\n".to_string(),
                "MSG FROM Bobby IS again\r\n".to_string(),
                "BYE\r\n".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_server_initiated_close() {
        let (addr, server) = mock_server("REPLY OK IS Welcome\r\n", "BYE\r\n").await;
        let (mut control, fsm, _events) = session(&addr);

        // 输入保持打开，只能由后台收到的 BYE 结束会话
        let (mut input_tx, input_rx) = tokio::io::duplex(1024);
        input_tx
            .write_all(b"/auth alice secret1 Alice\n")
            .await
            .unwrap();

        timeout(WAIT, control.run(BufReader::new(input_rx)))
            .await
            .unwrap()
            .unwrap();
        drop(input_tx);

        assert_eq!(fsm.current_state(), SessionState::End);
        assert_eq!(server.await.unwrap(), vec!["BYE\r\n".to_string()]);
    }

    #[tokio::test]
    async fn test_chat_before_auth_is_fatal() {
        let (addr, server) = mock_server("REPLY OK IS Welcome\r\n", "").await;
        let (mut control, fsm, _events) = session(&addr);

        let input: &[u8] = b"hello\n/auth alice secret1 Alice\n";
        let err = timeout(WAIT, control.run(input)).await.unwrap().unwrap_err();

        assert!(matches!(err, SessionError::AuthRequired));
        assert_eq!(fsm.current_state(), SessionState::End);
        // 未认证也会发送 BYE，且不会处理后续输入
        assert_eq!(server.await.unwrap(), vec!["BYE\r\n".to_string()]);
    }

    #[tokio::test]
    async fn test_usage_errors_are_reported() {
        let (addr, server) = mock_server("REPLY OK IS Welcome\r\n", "").await;
        let (mut control, fsm, mut events) = session(&addr);

        let input: &[u8] = b"/rename Bob\n/help\n/join general\n/bogus\n/auth onlyone\n";
        timeout(WAIT, control.run(input)).await.unwrap().unwrap();

        assert_eq!(fsm.current_state(), SessionState::End);
        assert_eq!(server.await.unwrap(), vec!["BYE\r\n".to_string()]);

        let events = drain(&mut events);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ClientEvent::info(HELP_TEXT));
        assert!(events[1..]
            .iter()
            .all(|event| matches!(event, ClientEvent::LocalError { .. })));
    }

    #[tokio::test]
    async fn test_auth_twice_is_usage_error() {
        let (addr, server) = mock_server("REPLY OK IS Welcome\r\n", "").await;
        let (mut control, _fsm, mut events) = session(&addr);

        let input: &[u8] = b"/auth alice secret1 Alice\n/auth alice secret1 Alice\n";
        timeout(WAIT, control.run(input)).await.unwrap().unwrap();

        assert_eq!(server.await.unwrap(), vec!["BYE\r\n".to_string()]);
        assert!(drain(&mut events).contains(&ClientEvent::local_error("You are already authenticated")));
    }

    #[tokio::test]
    async fn test_rejected_auth_can_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut replies = ["REPLY NOK IS Bad credentials\r\n", "REPLY OK IS Welcome\r\n"].into_iter();
            let mut received = Vec::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                if line.starts_with("AUTH") {
                    writer.write_all(replies.next().unwrap().as_bytes()).await.unwrap();
                }
                received.push(line);
            }
            received
        });

        let (mut control, fsm, mut events) = session(&addr);
        let input: &[u8] = b"/auth alice wrong Alice\n/auth alice secret1 Alice\nhi\n";
        timeout(WAIT, control.run(input)).await.unwrap().unwrap();

        assert_eq!(fsm.current_state(), SessionState::End);
        assert_eq!(
            server.await.unwrap(),
            vec![
                "AUTH alice AS Alice USING wrong\r\n".to_string(),
                "AUTH alice AS Alice USING secret1\r\n".to_string(),
                "MSG FROM Alice IS hi\r\n".to_string(),
                "BYE\r\n".to_string(),
            ]
        );
        let events = drain(&mut events);
        assert_eq!(
            events[0],
            ClientEvent::Reply {
                success: false,
                content: "Bad credentials".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_interrupt_ends_session() {
        let (addr, server) = mock_server("REPLY OK IS Welcome\r\n", "").await;
        let (mut control, fsm, _events) = session(&addr);

        let (_input_tx, input_rx) = tokio::io::duplex(64);
        let interrupt = fsm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.transition_to(SessionState::End);
        });

        timeout(WAIT, control.run(BufReader::new(input_rx)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.await.unwrap(), vec!["BYE\r\n".to_string()]);
    }

    #[tokio::test]
    async fn test_interrupt_while_waiting_for_auth_reply() {
        // 服务端读取 AUTH 后不回复
        let (addr, server) = mock_server("", "").await;
        let (mut control, fsm, _events) = session(&addr);

        let interrupt = fsm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            interrupt.transition_to(SessionState::End);
        });

        let input: &[u8] = b"/auth alice secret1 Alice\n";
        timeout(WAIT, control.run(input)).await.unwrap().unwrap();

        assert_eq!(fsm.current_state(), SessionState::End);
        assert_eq!(server.await.unwrap(), vec!["BYE\r\n".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (mut control, _fsm, _events) = session(&addr);
        let input: &[u8] = b"";
        let err = control.run(input).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
