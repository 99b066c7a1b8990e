// rust_websocket_session/src/transport/memory.rs

//! 进程内的模拟传输层。
//!
//! `pair` 生成一对互相连通的 `TransportSession`；`MemoryConnector` 在此基础上实现
//! `Connector`，并带有一个“可达性”开关，用来模拟服务端宕机与恢复。
//! 主要用于测试状态机、会话与集群，不经过任何网络。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::sync::{mpsc, watch};

use super::{ConnectionInfo, Connector, Transport, TransportSession};
use crate::error::WsError;
use crate::frame::{CloseReason, Frame};

/// 一对连接两端共享的状态。
struct PairState {
    /// `senders[i]` 把帧投递给第 `i` 端的入站流；关闭时整体清空，两端入站流随之结束。
    senders: Mutex<Option<[mpsc::Sender<Frame>; 2]>>,
    close_tx: watch::Sender<Option<CloseReason>>,
}

/// 内存连接的一端。
pub struct MemoryTransport {
    state: Arc<PairState>,
    side: usize,
}

/// 创建一对互相连通的内存连接。
pub fn pair(buffer: usize) -> (TransportSession, TransportSession) {
    let buffer = buffer.max(1);
    let (tx_a, rx_a) = mpsc::channel(buffer);
    let (tx_b, rx_b) = mpsc::channel(buffer);
    let (close_tx, _) = watch::channel(None);
    let state = Arc::new(PairState {
        senders: Mutex::new(Some([tx_a, tx_b])),
        close_tx,
    });
    let a = TransportSession {
        transport: Arc::new(MemoryTransport {
            state: Arc::clone(&state),
            side: 0,
        }),
        incoming: rx_a,
    };
    let b = TransportSession {
        transport: Arc::new(MemoryTransport { state, side: 1 }),
        incoming: rx_b,
    };
    (a, b)
}

impl MemoryTransport {
    fn peer_sender(&self) -> Option<mpsc::Sender<Frame>> {
        let guard = self
            .state
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref().map(|senders| senders[1 - self.side].clone())
    }

    fn shutdown(&self, reason: CloseReason) -> bool {
        let taken = self
            .state
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if taken.is_none() {
            return false;
        }
        self.state.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        true
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Frame) -> Result<(), WsError> {
        let sender = self.peer_sender().ok_or(WsError::SendErrorClosed)?;
        sender.send(frame).await.map_err(|_| WsError::SendErrorClosed)
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), WsError> {
        if self.shutdown(CloseReason::new(code, reason)) {
            debug!("[传输层] 内存连接 (端 {}) 已关闭: {} ({})", self.side, code, reason);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    async fn closed(&self) -> CloseReason {
        let mut rx = self.state.close_tx.subscribe();
        let result = rx
            .wait_for(|reason| reason.is_some())
            .await
            .map(|reason| reason.clone());
        match result {
            Ok(Some(reason)) => reason,
            _ => CloseReason::connection_lost(),
        }
    }
}

/// `MemoryConnector` 打开的每条连接的服务端一端，连同客户端提交的连接信息。
pub type MemoryAcceptor = mpsc::UnboundedReceiver<(ConnectionInfo, TransportSession)>;

/// 进程内的连接器。
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<(ConnectionInfo, TransportSession)>,
    reachable: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    buffer: usize,
}

impl MemoryConnector {
    /// 创建连接器以及对应的“服务端”接收器。
    pub fn new(buffer: usize) -> (Self, MemoryAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            reachable: Arc::new(AtomicBool::new(true)),
            attempts: Arc::new(AtomicUsize::new(0)),
            buffer,
        };
        (connector, accept_rx)
    }

    /// 切换端点是否可达。不可达时 `open` 返回 `WsError::ConnectionRefused`。
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// 到目前为止的连接尝试次数（包括失败的尝试）。
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, info: &ConnectionInfo) -> Result<TransportSession, WsError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionRefused(info.url.clone()));
        }
        let (client_side, server_side) = pair(self.buffer);
        self.accept_tx
            .send((info.clone(), server_side))
            .map_err(|_| WsError::ConnectionRefused(info.url.clone()))?;
        Ok(client_side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (mut a, mut b) = pair(8);
        a.transport.send(Frame::Text("ping?".into())).await.unwrap();
        b.transport.send(Frame::Binary(vec![1, 2, 3])).await.unwrap();
        assert_eq!(b.incoming.recv().await, Some(Frame::Text("ping?".into())));
        assert_eq!(a.incoming.recv().await, Some(Frame::Binary(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn close_ends_both_sides_with_the_same_reason() {
        let (mut a, mut b) = pair(8);
        a.transport.close(4001, "incoming frame error").await.unwrap();

        assert!(!a.transport.is_active());
        assert!(!b.transport.is_active());
        assert_eq!(a.incoming.recv().await, None);
        assert_eq!(b.incoming.recv().await, None);

        let reason = tokio::time::timeout(Duration::from_secs(1), b.transport.closed())
            .await
            .expect("closed() 应当立即返回");
        assert_eq!(reason, CloseReason::new(4001, "incoming frame error"));

        // 第二次关闭不覆盖第一次的原因
        b.transport.close(1000, "late").await.unwrap();
        assert_eq!(a.transport.closed().await.code, 4001);
        assert!(matches!(
            a.transport.send(Frame::Text("x".into())).await,
            Err(WsError::SendErrorClosed)
        ));
    }

    #[tokio::test]
    async fn unreachable_connector_refuses() {
        let (connector, mut acceptor) = MemoryConnector::new(8);
        let info = ConnectionInfo::new("ws://host/test").with_header("token", "abc");

        connector.set_reachable(false);
        assert!(matches!(
            connector.open(&info).await,
            Err(WsError::ConnectionRefused(_))
        ));

        connector.set_reachable(true);
        let _client = connector.open(&info).await.expect("端点可达时应当连接成功");
        let (seen, _server) = acceptor.recv().await.unwrap();
        assert_eq!(seen.headers, vec![("token".to_string(), "abc".to_string())]);
        assert_eq!(connector.attempts(), 2);
    }
}
