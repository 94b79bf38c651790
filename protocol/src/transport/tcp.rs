//! TCP 传输实现

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{MessageSink, MessageSource, Transport, TransportConfig};
use crate::codec::{LineReader, LineWriter};
use crate::error::{ProtocolError, Result};
use crate::message::Message;

/// TCP 传输实现
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    type Sink = LineWriter<OwnedWriteHalf>;
    type Source = LineReader<OwnedReadHalf>;

    async fn connect(addr: &str, config: &TransportConfig) -> Result<Self> {
        // 带超时的连接
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
            .map_err(ProtocolError::Io)?;

        stream.set_nodelay(config.nodelay)?;
        debug!("TCP connected to {}", addr);

        Ok(Self { stream })
    }

    fn split(self) -> (Self::Sink, Self::Source) {
        let (reader, writer) = self.stream.into_split();
        (LineWriter::new(writer), LineReader::new(reader))
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> MessageSink for LineWriter<W> {
    async fn send(&mut self, msg: &Message) -> Result<()> {
        self.write_message(msg).await
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> MessageSource for LineReader<R> {
    async fn recv(&mut self) -> Result<Option<Message>> {
        self.read_message().await
    }
}
