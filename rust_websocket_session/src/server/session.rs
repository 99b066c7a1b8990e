// rust_websocket_session/src/server/session.rs

//! 服务端会话：每条被接受的连接对应一个 `ServerSession`。
//!
//! 会话独占自己的传输层，启动后运行两个后台任务：
//! - 解码管道：按转换器的通道类型过滤入站帧，解码后发布到会话内部的广播流，
//!   回复 Ping，解码失败时以 4001 关闭；对端关闭时以对端给出的原因关闭；
//! - 活性检查：周期性检查传输层是否仍然活动（以及可选的空闲超时），否则以 1001 关闭。
//!
//! `close` 是幂等的：关闭传输层、调用一次 `on_closed`，最后取消会话的全部后台任务。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

use super::config::{ServerConfig, ServerHandler};
use crate::converter::{ContentConverter, WsData};
use crate::error::WsError;
use crate::frame::{Frame, close_code, close_reason};
use crate::scope::ConnectionScope;
use crate::transport::{Transport, TransportSession};

pub struct ServerSession<U, D> {
    id: Uuid,
    connected_at: DateTime<Utc>,
    transport: Arc<dyn Transport>,
    converter: ContentConverter<U, D>,
    handler: Arc<dyn ServerHandler<U, D>>,
    messages: broadcast::Sender<U>,
    scope: ConnectionScope,
    closed: AtomicBool,
    liveness_interval: Duration,
    idle_timeout: Option<Duration>,
    /// 用于空闲判定的单调时钟基准。
    created: Instant,
    /// 最近一次收到入站帧的时刻，相对 `created` 的毫秒数。
    last_activity_ms: AtomicU64,
    /// 入站帧流，在 `start` 时被解码管道取走。
    incoming: StdMutex<Option<mpsc::Receiver<Frame>>>,
}

impl<U, D> std::fmt::Debug for ServerSession<U, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<U: WsData, D: WsData> ServerSession<U, D> {
    /// 创建会话但不启动后台任务。一般通过 `open` 或 `server::accept_session` 使用。
    pub fn new(config: &ServerConfig<U, D>, session: TransportSession) -> Arc<Self> {
        let (messages, _) = broadcast::channel(config.message_buffer.max(1));
        Arc::new(Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            transport: session.transport,
            converter: config.converter.clone(),
            handler: Arc::clone(&config.handler),
            messages,
            scope: ConnectionScope::new(),
            closed: AtomicBool::new(false),
            liveness_interval: config.liveness_interval,
            idle_timeout: config.idle_timeout,
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            incoming: StdMutex::new(Some(session.incoming)),
        })
    }

    /// 创建并立即启动会话。
    pub fn open(config: &ServerConfig<U, D>, session: TransportSession) -> Arc<Self> {
        let session = Self::new(config, session);
        session.start();
        session
    }

    /// 启动解码管道、活性检查，并调用一次 `on_connect`。重复调用无效果。
    pub fn start(self: &Arc<Self>) {
        let incoming = self
            .incoming
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(incoming) = incoming else {
            debug!("[服务端会话] 会话 {} 已经启动过", self.id);
            return;
        };
        info!("[服务端会话] 会话 {} 已启动", self.id);

        // on_connect 拿到的流要在管道开始发布之前订阅
        let messages = self.messages.subscribe();

        let session = Arc::clone(self);
        self.scope.spawn(session.run_pipeline(incoming));

        let session = Arc::clone(self);
        self.scope.spawn(session.run_liveness());

        let session = Arc::clone(self);
        let handler = Arc::clone(&self.handler);
        self.scope
            .spawn(async move { handler.on_connect(session, messages).await });
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// 会话存活时间是否已经达到 `max_lifetime`。
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.connected_at)
            .to_std()
            .is_ok_and(|age| age >= max_lifetime)
    }

    pub fn is_active(&self) -> bool {
        !self.is_closed() && self.transport.is_active()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 等待会话关闭。
    pub async fn closed(&self) {
        self.scope.cancelled().await
    }

    /// 订阅已解码的上行消息流。
    pub fn subscribe(&self) -> broadcast::Receiver<U> {
        self.messages.subscribe()
    }

    /// 编码并发送一条下行消息。传输层不再活动时为无操作。
    pub async fn send(&self, data: &D) -> Result<(), WsError> {
        if !self.is_active() {
            debug!("[服务端会话] 会话 {} 的传输层不再活动，忽略发送", self.id);
            return Ok(());
        }
        let frame = self.converter.encode_downstream(data)?;
        self.transport.send(frame).await
    }

    /// 等待下一条已解码的上行消息。
    pub async fn receive(&self, timeout: Duration) -> Result<U, WsError> {
        if self.is_closed() {
            return Err(WsError::SessionClosed);
        }
        let mut messages = self.messages.subscribe();
        let next = async {
            loop {
                match messages.recv().await {
                    Ok(message) => return Ok(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[服务端会话] 会话 {} 的 receive 落后，跳过了 {} 条消息", self.id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(WsError::SessionClosed),
                }
            }
        };
        tokio::select! {
            result = tokio::time::timeout(timeout, next) => result.map_err(|_| WsError::Timeout(timeout))?,
            _ = self.scope.cancelled() => Err(WsError::SessionClosed),
        }
    }

    /// 关闭会话。对已关闭的会话调用是无操作。
    pub async fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[服务端会话] 关闭会话 {}: {} ({})", self.id, code, reason);
        if self.transport.is_active() {
            if let Err(e) = self.transport.close(code, reason).await {
                warn!("[服务端会话] 关闭会话 {} 的传输层失败: {}", self.id, e);
            }
        }
        self.handler.on_closed(self.id, code, reason).await;
        self.scope.cancel();
    }

    /// 拒绝一个尚未启动的会话：关闭传输层，不触发任何回调。
    pub(crate) async fn reject(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.transport.close(code, reason).await {
            debug!("[服务端会话] 拒绝会话 {} 时关闭传输层失败: {}", self.id, e);
        }
        self.scope.cancel();
    }

    fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis();
        self.last_activity_ms
            .store(u64::try_from(elapsed).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::SeqCst));
        self.created.elapsed().saturating_sub(last)
    }

    async fn run_pipeline(self: Arc<Self>, mut incoming: mpsc::Receiver<Frame>) {
        let kind = self.converter.kind();
        let replies_to_ping = self.transport.replies_to_ping();
        while let Some(frame) = incoming.recv().await {
            self.touch();
            match frame {
                Frame::Ping(_) if replies_to_ping => {}
                Frame::Ping(payload) => {
                    if let Err(e) = self.transport.send(Frame::Pong(payload)).await {
                        debug!("[服务端会话] 会话 {} 回复 Pong 失败: {}", self.id, e);
                    }
                }
                Frame::Pong(_) => {}
                data if kind.accepts(&data) => match self.converter.decode_upstream(&data) {
                    Ok(message) => {
                        let _ = self.messages.send(message);
                    }
                    Err(e) => {
                        error!("[服务端会话] 会话 {} 的入站帧解码失败: {}", self.id, e);
                        self.handler.on_error(self.id, &e).await;
                        self.close(close_code::INCOMING_FRAME_ERROR, close_reason::INCOMING_FRAME_ERROR)
                            .await;
                        return;
                    }
                },
                other => debug!("[服务端会话] 会话 {} 忽略 {} 帧", self.id, other.kind_name()),
            }
        }
        let reason = self.transport.closed().await;
        debug!("[服务端会话] 会话 {} 的对端已关闭: {}", self.id, reason);
        self.close(reason.code, &reason.reason).await;
    }

    async fn run_liveness(self: Arc<Self>) {
        let period = self.liveness_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let idle = self.idle_timeout.is_some_and(|limit| self.idle_for() >= limit);
            if !self.transport.is_active() || idle {
                info!("[服务端会话] 会话 {} 失活或空闲超时，强制关闭", self.id);
                self.close(close_code::GOING_AWAY, close_reason::SESSION_CLOSED_BY_SERVER)
                    .await;
                return;
            }
        }
    }
}
