//! IPK24-CHAT 客户端
//!
//! 从标准输入读取命令和消息，通过 TCP 或 UDP 与服务器通信。

mod cli;
mod client;
mod command;
mod control;
mod error;
mod session;
mod terminal;

use anyhow::Result;
use clap::Parser;
use protocol::{TcpTransport, Transport, UdpTransport};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, TransportKind};
use crate::client::ChatClient;
use crate::control::SessionControl;
use crate::session::{SessionState, StateMachine};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.transport {
        TransportKind::Tcp => run::<TcpTransport>(&cli).await,
        TransportKind::Udp => run::<UdpTransport>(&cli).await,
    };

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("ERR: {e:#}");
            1
        }
    };

    // 标准输入上的阻塞读取无法取消，不等待运行时关闭
    std::process::exit(code);
}

async fn run<T: Transport>(cli: &Cli) -> Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(terminal::print_events(events_rx));

    let fsm = StateMachine::new();
    let interrupt = fsm.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Interrupted");
        interrupt.transition_to(SessionState::End);
    });

    let client = ChatClient::<T>::new(
        cli.server_addr(),
        cli.transport_config(),
        fsm,
        events_tx.clone(),
    );
    let mut control = SessionControl::new(client, events_tx);
    let result = control.run(BufReader::new(tokio::io::stdin())).await;

    // 关闭所有事件发送端，等待输出写完
    drop(control);
    printer.await??;

    Ok(result?)
}
