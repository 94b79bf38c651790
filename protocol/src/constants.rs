//! 协议常量定义

use std::time::Duration;

/// 默认服务器端口
pub const DEFAULT_PORT: u16 = 4567;

/// 用户名最大长度
pub const MAX_USERNAME_LEN: usize = 20;

/// 频道 ID 最大长度
pub const MAX_CHANNEL_ID_LEN: usize = 20;

/// 密钥最大长度
pub const MAX_SECRET_LEN: usize = 128;

/// 显示名最大长度
pub const MAX_DISPLAY_NAME_LEN: usize = 20;

/// 单条消息内容最大长度
pub const MAX_CONTENT_LEN: usize = 1400;

/// 单行最大长度（含 CRLF）
pub const MAX_LINE_LEN: usize = 2048;

/// 单个数据报最大大小
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// 数据报去重窗口（记住最近收到的消息 ID 数量）
pub const DEDUP_WINDOW: usize = 1024;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// UDP 确认超时（毫秒）
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 250;

/// UDP 最大重传次数
pub const DEFAULT_MAX_RETRANSMISSIONS: u8 = 3;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// UDP 确认超时 Duration
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS);
