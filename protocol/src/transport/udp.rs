//! UDP 传输实现
//!
//! 每条消息是一个 DATA 数据报，对端必须用相同 ID 的 CONFIRM 确认。
//! 发送端在确认超时后重传，重传次数用尽即视为传输故障；
//! 接收端对每个 DATA 立即回复 CONFIRM，并丢弃重复的 ID。

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{MessageSink, MessageSource, Transport, TransportConfig};
use crate::codec;
use crate::datagram::Datagram;
use crate::error::{ProtocolError, Result};
use crate::message::Message;
use crate::{DEDUP_WINDOW, MAX_DATAGRAM_SIZE};

/// UDP 传输实现
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    config: TransportConfig,
}

impl Transport for UdpTransport {
    type Sink = UdpSender;
    type Source = UdpReceiver;

    async fn connect(addr: &str, config: &TransportConfig) -> Result<Self> {
        let peer = timeout(config.connect_timeout, lookup_host(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)??
            .next()
            .ok_or_else(|| ProtocolError::AddressResolution(addr.to_string()))?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        debug!("UDP socket {} bound for {}", socket.local_addr()?, peer);

        Ok(Self {
            socket,
            peer,
            config: config.clone(),
        })
    }

    fn split(self) -> (Self::Sink, Self::Source) {
        let shared = Arc::new(Shared {
            socket: self.socket,
            peer: Mutex::new(self.peer),
            pending: Mutex::new(HashMap::new()),
        });
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pump = tokio::spawn(pump(Arc::clone(&shared), inbound_tx, shutdown_rx));

        let sender = UdpSender {
            shared,
            next_id: 0,
            confirm_timeout: self.config.confirm_timeout,
            max_retransmissions: self.config.max_retransmissions,
            shutdown: shutdown_tx,
            pump: Some(pump),
        };
        let receiver = UdpReceiver {
            inbound: inbound_rx,
        };
        (sender, receiver)
    }
}

/// 发送端与接收泵共享的状态
struct Shared {
    socket: UdpSocket,
    /// 服务器地址，服务器可能改用新的端口回复
    peer: Mutex<SocketAddr>,
    /// 等待确认的消息: message id -> 通知
    pending: Mutex<HashMap<u16, oneshot::Sender<()>>>,
}

impl Shared {
    /// 只接受来自服务器主机的数据报
    async fn accepts(&self, from: SocketAddr) -> bool {
        self.peer.lock().await.ip() == from.ip()
    }

    /// 服务器从新端口发来数据时，后续消息发往该端口
    async fn rebind(&self, from: SocketAddr) {
        let mut peer = self.peer.lock().await;
        if *peer != from {
            info!("Server switched to {} (was {})", from, *peer);
            *peer = from;
        }
    }
}

/// UDP 发送端
pub struct UdpSender {
    shared: Arc<Shared>,
    next_id: u16,
    confirm_timeout: Duration,
    max_retransmissions: u8,
    shutdown: watch::Sender<bool>,
    pump: Option<JoinHandle<()>>,
}

impl MessageSink for UdpSender {
    async fn send(&mut self, msg: &Message) -> Result<()> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let bytes = Datagram::data(id, msg)?.encode();

        let (confirm_tx, mut confirm_rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, confirm_tx);

        let attempts = 1 + u32::from(self.max_retransmissions);
        for attempt in 1..=attempts {
            let peer = *self.shared.peer.lock().await;
            if let Err(e) = self.shared.socket.send_to(&bytes, peer).await {
                self.shared.pending.lock().await.remove(&id);
                return Err(e.into());
            }

            match timeout(self.confirm_timeout, &mut confirm_rx).await {
                Ok(Ok(())) => {
                    debug!("{} (id={}) confirmed after {} attempt(s)", msg.kind(), id, attempt);
                    return Ok(());
                }
                // 接收泵已退出
                Ok(Err(_)) => return Err(ProtocolError::ConnectionClosed),
                Err(_) => debug!("No confirm for id={} (attempt {}/{})", id, attempt, attempts),
            }
        }

        self.shared.pending.lock().await.remove(&id);
        Err(ProtocolError::ConfirmTimeout { id, attempts })
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        Ok(())
    }
}

/// UDP 接收端
pub struct UdpReceiver {
    inbound: mpsc::UnboundedReceiver<Result<Message>>,
}

impl MessageSource for UdpReceiver {
    async fn recv(&mut self) -> Result<Option<Message>> {
        match self.inbound.recv().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }
}

/// 最近收到的消息 ID，超出窗口时淘汰最旧的
struct SeenIds {
    ids: HashSet<u16>,
    order: VecDeque<u16>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 首次出现返回 true
    fn insert(&mut self, id: u16) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// 接收泵：唯一读取 socket 的任务
///
/// CONFIRM 交给等待中的发送端，DATA 确认后解码放入入站队列。
async fn pump(
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<Result<Message>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut seen = SeenIds::new(DEDUP_WINDOW);

    loop {
        let (len, from) = tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            result = shared.socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    let _ = inbound.send(Err(e.into()));
                    break;
                }
            },
        };

        if !shared.accepts(from).await {
            debug!("Ignoring datagram from unknown host {}", from);
            continue;
        }

        let datagram = match Datagram::decode(&buf[..len]) {
            Ok(datagram) => datagram,
            Err(e) => {
                // 头部可读的 DATA 仍需确认，否则服务器会一直重传
                match Datagram::data_id(&buf[..len]) {
                    Some(id) => {
                        warn!("Malformed payload in id={} from {}: {}", id, from, e);
                        deliver(&shared, &mut seen, &inbound, from, id, Some(Err(e))).await;
                    }
                    None => warn!("Dropping datagram from {}: {}", from, e),
                }
                continue;
            }
        };

        match datagram {
            Datagram::Confirm { id } => match shared.pending.lock().await.remove(&id) {
                Some(waiter) => {
                    let _ = waiter.send(());
                }
                None => debug!("Stale confirm for id={}", id),
            },
            Datagram::Data { id, payload } => {
                let item = codec::decode(&payload).map_err(ProtocolError::from).transpose();
                deliver(&shared, &mut seen, &inbound, from, id, item).await;
            }
        }
    }

    // 唤醒所有等待确认的发送端
    shared.pending.lock().await.clear();
    debug!("UDP pump stopped");
}

/// 确认 DATA，首次出现的 ID 放入入站队列
async fn deliver(
    shared: &Shared,
    seen: &mut SeenIds,
    inbound: &mpsc::UnboundedSender<Result<Message>>,
    from: SocketAddr,
    id: u16,
    item: Option<Result<Message>>,
) {
    shared.rebind(from).await;

    let confirm = Datagram::Confirm { id }.encode();
    if let Err(e) = shared.socket.send_to(&confirm, from).await {
        warn!("Failed to confirm id={}: {}", id, e);
    }

    if !seen.insert(id) {
        debug!("Duplicate datagram id={}", id);
        return;
    }

    if let Some(item) = item {
        if inbound.send(item).is_err() {
            // 接收端已释放，仍然继续确认，便于最后的 BYE 完成
            debug!("Inbound receiver dropped, discarding id={}", id);
        }
    }
}
