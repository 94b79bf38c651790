//! 消息编解码
//!
//! 线路格式（每条消息一行，流式传输以 CRLF 结尾）:
//! ```text
//! AUTH {username} AS {displayName} USING {secret}
//! JOIN {channelId} AS {displayName}
//! MSG FROM {displayName} IS {content}
//! ERR FROM {displayName} IS {content}
//! REPLY {OK|NOK} IS {content}
//! BYE
//! ```
//!
//! 关键字不区分大小写；`IS` 之后直到行尾都是内容，不再按空格切分。

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{DecodeError, ProtocolError, Result};
use crate::message::Message;
use crate::MAX_LINE_LEN;

/// 行结束符
pub const LINE_TERMINATOR: &str = "\r\n";

/// 将消息编码为一行文本（不含行结束符）
pub fn encode(msg: &Message) -> Result<String> {
    msg.validate()?;
    let line = match msg {
        Message::Auth {
            username,
            display_name,
            secret,
        } => format!("AUTH {username} AS {display_name} USING {secret}"),
        Message::Join {
            channel_id,
            display_name,
        } => format!("JOIN {channel_id} AS {display_name}"),
        Message::Msg {
            display_name,
            content,
        } => format!("MSG FROM {display_name} IS {content}"),
        Message::Err {
            display_name,
            content,
        } => format!("ERR FROM {display_name} IS {content}"),
        Message::Reply { ok, content } => {
            let status = if *ok { "OK" } else { "NOK" };
            format!("REPLY {status} IS {content}")
        }
        Message::Bye => "BYE".to_string(),
        Message::Unknown { .. } => return Err(ProtocolError::NotEncodable(msg.kind())),
    };
    Ok(line)
}

/// 解码一行文本
///
/// 空行返回 `Ok(None)`；首个关键字无法识别时返回 [`Message::Unknown`]。
pub fn decode(line: &str) -> std::result::Result<Option<Message>, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let mut tokens = Tokens::new(line);
    let keyword = tokens.next().unwrap_or_default().to_ascii_uppercase();

    let msg = match keyword.as_str() {
        "AUTH" => {
            let username = tokens.field("AUTH", "username")?;
            tokens.keyword("AS")?;
            let display_name = tokens.field("AUTH", "display name")?;
            tokens.keyword("USING")?;
            let secret = tokens.field("AUTH", "secret")?;
            tokens.finish()?;
            Message::auth(username, display_name, secret)
        }
        "JOIN" => {
            let channel_id = tokens.field("JOIN", "channel id")?;
            tokens.keyword("AS")?;
            let display_name = tokens.field("JOIN", "display name")?;
            tokens.finish()?;
            Message::join(channel_id, display_name)
        }
        "MSG" => {
            tokens.keyword("FROM")?;
            let display_name = tokens.field("MSG", "display name")?;
            tokens.keyword("IS")?;
            Message::msg(display_name, tokens.content("MSG")?)
        }
        "ERR" => {
            tokens.keyword("FROM")?;
            let display_name = tokens.field("ERR", "display name")?;
            tokens.keyword("IS")?;
            Message::err(display_name, tokens.content("ERR")?)
        }
        "REPLY" => {
            let status = tokens.field("REPLY", "status")?;
            let ok = if status.eq_ignore_ascii_case("OK") {
                true
            } else if status.eq_ignore_ascii_case("NOK") {
                false
            } else {
                return Err(DecodeError::InvalidReplyStatus(status.to_string()));
            };
            tokens.keyword("IS")?;
            Message::reply(ok, tokens.content("REPLY")?)
        }
        // 较新的服务器会发送 `BYE FROM {displayName}`，多余部分忽略
        "BYE" => Message::Bye,
        _ => Message::Unknown {
            raw: line.to_string(),
        },
    };

    Ok(Some(msg))
}

/// 按单个空格切分的词法游标
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        match self.rest.split_once(' ') {
            Some((token, rest)) => {
                self.rest = rest;
                Some(token)
            }
            None => Some(std::mem::take(&mut self.rest)),
        }
    }

    fn field(
        &mut self,
        kind: &'static str,
        field: &'static str,
    ) -> std::result::Result<&'a str, DecodeError> {
        match self.next() {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(DecodeError::MissingField { kind, field }),
        }
    }

    fn keyword(&mut self, expected: &'static str) -> std::result::Result<(), DecodeError> {
        match self.next() {
            Some(token) if token.eq_ignore_ascii_case(expected) => Ok(()),
            found => Err(DecodeError::UnexpectedToken {
                expected,
                found: found.unwrap_or_default().to_string(),
            }),
        }
    }

    /// 剩余部分原样作为内容
    fn content(self, kind: &'static str) -> std::result::Result<&'a str, DecodeError> {
        if self.rest.is_empty() {
            return Err(DecodeError::MissingField {
                kind,
                field: "content",
            });
        }
        Ok(self.rest)
    }

    fn finish(self) -> std::result::Result<(), DecodeError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedToken {
                expected: "end of line",
                found: self.rest.to_string(),
            })
        }
    }
}

/// 行读取器
pub struct LineReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// 创建新的行读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    /// 读取并解码下一条消息
    ///
    /// 空行会被跳过；对端关闭连接时返回 `Ok(None)`。
    /// 无法解析的行（包括非 UTF-8）返回错误，但整行已被消费，可以继续读取。
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        loop {
            self.buffer.clear();
            let read = (&mut self.reader)
                .take(MAX_LINE_LEN as u64)
                .read_until(b'\n', &mut self.buffer)
                .await?;
            if read == 0 {
                return Ok(None);
            }
            if read == MAX_LINE_LEN && !self.buffer.ends_with(b"\n") {
                self.skip_line().await?;
                return Err(ProtocolError::LineTooLong {
                    len: read,
                    max: MAX_LINE_LEN,
                });
            }

            let line = std::str::from_utf8(&self.buffer).map_err(|_| DecodeError::InvalidUtf8)?;
            if let Some(msg) = decode(line)? {
                return Ok(Some(msg));
            }
        }
    }

    /// 丢弃当前行剩余部分（直到下一个 `\n`）
    async fn skip_line(&mut self) -> Result<()> {
        loop {
            let (found, used) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    return Ok(());
                }
                match available.iter().position(|&b| b == b'\n') {
                    Some(pos) => (true, pos + 1),
                    None => (false, available.len()),
                }
            };
            self.reader.consume(used);
            if found {
                return Ok(());
            }
        }
    }
}

/// 行写入器
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// 创建新的行写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 编码并写入一行，立即 flush
    pub async fn write_message(&mut self, msg: &Message) -> Result<()> {
        let mut line = encode(msg)?;
        line.push_str(LINE_TERMINATOR);

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// 关闭写入端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_wire_forms() {
        assert_eq!(
            encode(&Message::auth("alice", "Alice", "secret1")).unwrap(),
            "AUTH alice AS Alice USING secret1"
        );
        assert_eq!(
            encode(&Message::join("general", "Alice")).unwrap(),
            "JOIN general AS Alice"
        );
        assert_eq!(
            encode(&Message::msg("Alice", "hello there")).unwrap(),
            "MSG FROM Alice IS hello there"
        );
        assert_eq!(
            encode(&Message::reply(false, "Bad credentials")).unwrap(),
            "REPLY NOK IS Bad credentials"
        );
        assert_eq!(encode(&Message::Bye).unwrap(), "BYE");
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let messages = [
            Message::auth("alice", "Alice", "secret1"),
            Message::join("discord.general", "Alice"),
            Message::msg("Alice", "hello  world, with  double spaces"),
            Message::err("Server", "something went wrong"),
            Message::reply(true, "Welcome"),
            Message::reply(false, "Bad credentials"),
            Message::Bye,
        ];

        for msg in messages {
            let line = encode(&msg).unwrap();
            assert_eq!(decode(&line).unwrap(), Some(msg));
        }
    }

    #[test]
    fn test_decode_empty_is_nothing() {
        assert_eq!(decode("").unwrap(), None);
        assert_eq!(decode("   ").unwrap(), None);
        assert_eq!(decode("\r\n").unwrap(), None);
    }

    #[test]
    fn test_decode_unknown_kind() {
        assert_eq!(
            decode("BOGUS foo bar").unwrap(),
            Some(Message::Unknown {
                raw: "BOGUS foo bar".to_string()
            })
        );
    }

    #[test]
    fn test_decode_strips_crlf_and_ignores_case() {
        assert_eq!(
            decode("msg from Bob is Hi there\r\n").unwrap(),
            Some(Message::msg("Bob", "Hi there"))
        );
        assert_eq!(
            decode("reply ok is Joined general").unwrap(),
            Some(Message::reply(true, "Joined general"))
        );
    }

    #[test]
    fn test_decode_content_not_resplit() {
        let msg = decode("MSG FROM Bob IS  IS FROM  MSG ").unwrap();
        assert_eq!(msg, Some(Message::msg("Bob", " IS FROM  MSG ")));
    }

    #[test]
    fn test_decode_truncated_input() {
        assert_eq!(
            decode("MSG FROM").unwrap_err(),
            DecodeError::MissingField {
                kind: "MSG",
                field: "display name"
            }
        );
        assert_eq!(
            decode("ERR FROM Server IS").unwrap_err(),
            DecodeError::MissingField {
                kind: "ERR",
                field: "content"
            }
        );
        assert!(decode("AUTH alice").is_err());
        assert!(decode("REPLY").is_err());
        assert!(decode("JOIN").is_err());
    }

    #[test]
    fn test_decode_wrong_keyword() {
        assert_eq!(
            decode("MSG TO Bob IS hi").unwrap_err(),
            DecodeError::UnexpectedToken {
                expected: "FROM",
                found: "TO".to_string()
            }
        );
    }

    #[test]
    fn test_decode_invalid_reply_status() {
        assert_eq!(
            decode("REPLY MAYBE IS hmm").unwrap_err(),
            DecodeError::InvalidReplyStatus("MAYBE".to_string())
        );
    }

    #[test]
    fn test_decode_trailing_tokens_in_join() {
        assert!(matches!(
            decode("JOIN general AS Alice extra"),
            Err(DecodeError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn test_decode_bye_from() {
        assert_eq!(decode("BYE FROM Server").unwrap(), Some(Message::Bye));
    }

    #[test]
    fn test_encode_rejects_unknown_and_missing() {
        let unknown = Message::Unknown {
            raw: "BOGUS".to_string(),
        };
        assert!(matches!(
            encode(&unknown),
            Err(ProtocolError::NotEncodable(_))
        ));
        assert!(matches!(
            encode(&Message::msg("Alice", "")),
            Err(ProtocolError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn test_line_writer_appends_crlf() {
        let mut buffer = Vec::new();
        {
            let mut writer = LineWriter::new(&mut buffer);
            writer
                .write_message(&Message::msg("Alice", "hello"))
                .await
                .unwrap();
            writer.write_message(&Message::Bye).await.unwrap();
        }
        assert_eq!(buffer, b"MSG FROM Alice IS hello\r\nBYE\r\n");
    }

    #[tokio::test]
    async fn test_line_reader_reads_messages_until_eof() {
        let input = b"REPLY OK IS Welcome\r\n\r\nMSG FROM Bob IS hi\nBYE".to_vec();
        let mut reader = LineReader::new(Cursor::new(input));

        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(Message::reply(true, "Welcome"))
        );
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(Message::msg("Bob", "hi"))
        );
        assert_eq!(reader.read_message().await.unwrap(), Some(Message::Bye));
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_reader_surfaces_decode_error_and_continues() {
        let input = b"MSG FROM\r\nBYE\r\n".to_vec();
        let mut reader = LineReader::new(Cursor::new(input));

        assert!(matches!(
            reader.read_message().await,
            Err(ProtocolError::Decode(_))
        ));
        assert_eq!(reader.read_message().await.unwrap(), Some(Message::Bye));
    }

    #[tokio::test]
    async fn test_line_reader_rejects_oversized_line() {
        let input = "MSG FROM Bob IS ".to_string() + &"x".repeat(MAX_LINE_LEN) + "\r\n";
        let mut reader = LineReader::new(Cursor::new(input.into_bytes()));

        assert!(matches!(
            reader.read_message().await,
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_line_reader_resyncs_after_oversized_line() {
        let input = "MSG FROM Bob IS ".to_string()
            + &"x".repeat(MAX_LINE_LEN * 2)
            + "\r\nMSG FROM Bob IS short\r\n";
        let mut reader = LineReader::new(Cursor::new(input.into_bytes()));

        assert!(matches!(
            reader.read_message().await,
            Err(ProtocolError::LineTooLong { .. })
        ));
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(Message::msg("Bob", "short"))
        );
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_reader_invalid_utf8_is_decode_error() {
        let input = b"MSG FROM Bob IS caf\xe9\r\nBYE\r\n".to_vec();
        let mut reader = LineReader::new(Cursor::new(input));

        let err = reader.read_message().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(DecodeError::InvalidUtf8)));
        assert!(!err.is_transport_fault());
        assert_eq!(reader.read_message().await.unwrap(), Some(Message::Bye));
    }
}
