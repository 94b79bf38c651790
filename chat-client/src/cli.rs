//! 命令行参数

use std::time::Duration;

use clap::{Parser, ValueEnum};
use protocol::{TransportConfig, DEFAULT_CONFIRM_TIMEOUT_MS, DEFAULT_MAX_RETRANSMISSIONS, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about = "IPK24-CHAT client", long_about = None)]
pub struct Cli {
    /// Transport protocol used for the session.
    #[arg(short = 't', value_enum)]
    pub transport: TransportKind,

    /// Server IP address or hostname.
    #[arg(short = 's')]
    pub server: String,

    /// Server port.
    #[arg(short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// UDP confirmation timeout in milliseconds.
    #[arg(short = 'd', default_value_t = DEFAULT_CONFIRM_TIMEOUT_MS)]
    pub timeout: u64,

    /// Maximum number of UDP retransmissions.
    #[arg(short = 'r', default_value_t = DEFAULT_MAX_RETRANSMISSIONS)]
    pub retransmissions: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    #[value(alias = "stream")]
    Tcp,
    #[value(alias = "datagram")]
    Udp,
}

impl Cli {
    /// `host:port` 形式的服务器地址，IPv6 字面量加方括号
    pub fn server_addr(&self) -> String {
        if self.server.contains(':') && !self.server.starts_with('[') {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            confirm_timeout: Duration::from_millis(self.timeout),
            max_retransmissions: self.retransmissions,
            ..TransportConfig::default()
        }
    }
}
