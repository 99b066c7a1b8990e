// rust_websocket_session/src/client/connection.rs

//! 客户端连接状态机。
//!
//! `WsClient` 维护一条逻辑连接的完整生命周期：
//! - 所有读-改-写状态的操作 (`Connect`、`Disconnect`、启动重连) 都在同一把互斥锁内执行；
//! - 每次连接成功都会创建新的一代 (`generation`) 和新的 `ConnectionScope`，
//!   帧分发、Ping 响应、关闭监视（以及可选的健康检查）任务都挂在该作用域下；
//! - 后台任务发现连接结束时不会在自身内部执行断开（那会取消自己），
//!   而是派生一个独立任务，并携带自己的代号，过期代号的断开请求会被忽略。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, MutexGuard, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::config::ClientConfig;
use super::state::{Command, ConnectionState};
use crate::converter::WsData;
use crate::error::WsError;
use crate::frame::{CloseReason, Frame, close_code, close_reason};
use crate::scope::ConnectionScope;
use crate::transport::{Transport, TransportSession};

/// 互斥锁保护的生命周期状态。
#[derive(Default)]
struct Lifecycle {
    /// 当前这一代连接的作用域；没有活动连接时为 `None`。
    scope: Option<ConnectionScope>,
    generation: u64,
    /// 正在运行的重连循环的取消令牌。
    retry: Option<CancellationToken>,
}

struct CurrentTransport {
    generation: u64,
    transport: Arc<dyn Transport>,
}

struct ClientInner<U, D> {
    config: ClientConfig<U, D>,
    state: watch::Sender<ConnectionState>,
    messages: broadcast::Sender<D>,
    lifecycle: Mutex<Lifecycle>,
    current: StdMutex<Option<CurrentTransport>>,
}

/// 带自动重连的类型化 WebSocket 客户端。可以廉价克隆，所有克隆共享同一条逻辑连接。
pub struct WsClient<U, D> {
    inner: Arc<ClientInner<U, D>>,
}

impl<U, D> Clone for WsClient<U, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U: WsData, D: WsData> WsClient<U, D> {
    pub fn new(config: ClientConfig<U, D>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (messages, _) = broadcast::channel(config.message_buffer.max(1));
        Self {
            inner: Arc::new(ClientInner {
                config,
                state,
                messages,
                lifecycle: Mutex::new(Lifecycle::default()),
                current: StdMutex::new(None),
            }),
        }
    }

    /// 当前状态。
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// 订阅状态变化；新的观察者会立即看到最新状态。
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// 订阅已解码的下行消息流。
    pub fn subscribe(&self) -> broadcast::Receiver<D> {
        self.inner.messages.subscribe()
    }

    /// 执行一条命令。
    pub async fn execute(&self, command: Command) -> Result<(), WsError> {
        match command {
            Command::Connect => {
                let mut lifecycle = self.inner.lifecycle.lock().await;
                self.connect_locked(&mut lifecycle).await
            }
            Command::Disconnect {
                code,
                reason,
                abnormal,
            } => {
                let mut lifecycle = self.inner.lifecycle.lock().await;
                self.disconnect_locked(&mut lifecycle, None, code, &reason, abnormal)
                    .await;
                Ok(())
            }
            Command::Ping { payload } => self.send_control(Frame::Ping(payload)).await,
            Command::Pong { payload } => self.send_control(Frame::Pong(payload)).await,
        }
    }

    /// 编码并发送一条上行消息。要求处于 `Connected` 状态。
    pub async fn send(&self, data: &U) -> Result<(), WsError> {
        if self.state() != ConnectionState::Connected {
            return Err(WsError::NotConnected);
        }
        let transport = self.current_transport().ok_or(WsError::NotConnected)?;
        let frame = self.inner.config.converter.encode_upstream(data)?;
        transport.send(frame).await
    }

    /// 等待下一条已解码的下行消息。不会影响其他订阅者。
    pub async fn receive(&self, timeout: Duration) -> Result<D, WsError> {
        if self.state() != ConnectionState::Connected {
            return Err(WsError::NotConnected);
        }
        let mut messages = self.inner.messages.subscribe();
        let next = async {
            loop {
                match messages.recv().await {
                    Ok(message) => return Ok(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[客户端] receive 落后，跳过了 {} 条消息", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(WsError::NotConnected),
                }
            }
        };
        tokio::time::timeout(timeout, next)
            .await
            .map_err(|_| WsError::Timeout(timeout))?
    }

    /// 正常断开并等待本代连接的后台任务全部结束。
    pub async fn shutdown(&self) {
        let scope = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            let scope = lifecycle.scope.clone();
            self.disconnect_locked(
                &mut lifecycle,
                None,
                close_code::NORMAL,
                close_reason::CLOSE_NORMALLY,
                false,
            )
            .await;
            scope
        };
        if let Some(scope) = scope {
            scope.wait().await;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            info!("[客户端] 状态变更: {} -> {}", previous, state);
        }
    }

    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|current| Arc::clone(&current.transport))
    }

    fn take_transport(&self) -> Option<CurrentTransport> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn send_control(&self, frame: Frame) -> Result<(), WsError> {
        match self.current_transport() {
            Some(transport) if transport.is_active() => transport.send(frame).await,
            _ => {
                debug!("[客户端] 没有活动连接，忽略 {} 控制帧", frame.kind_name());
                Ok(())
            }
        }
    }

    /// 关闭原因是否应当视为异常。
    pub fn is_abnormal(&self, reason: &CloseReason) -> bool {
        reason.is_ping_timeout()
            || (self.inner.config.abnormal_close_code)(reason.code)
            || (self.inner.config.abnormal_close_reason)(&reason.reason)
    }

    async fn connect_locked(&self, lifecycle: &mut MutexGuard<'_, Lifecycle>) -> Result<(), WsError> {
        if self.state() == ConnectionState::Connected {
            debug!("[客户端] 已处于 CONNECTED，忽略 Connect 命令");
            return Ok(());
        }
        let config = &self.inner.config;

        let info = match config.endpoint.build().await {
            Ok(info) => info,
            Err(e) => {
                error!("[客户端] 端点提供者生成连接信息失败: {}", e);
                self.set_state(Self::state_after_failed_connect(lifecycle));
                config.handler.on_error(&e).await;
                return Err(e);
            }
        };

        self.set_state(ConnectionState::Connecting);
        match config.connector.open(&info).await {
            Ok(session) => {
                lifecycle.generation += 1;
                let generation = lifecycle.generation;
                let scope = ConnectionScope::new();
                *self
                    .inner
                    .current
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(CurrentTransport {
                    generation,
                    transport: Arc::clone(&session.transport),
                });
                self.set_state(ConnectionState::Connected);
                info!("[客户端] 已连接到 {} (第 {} 代连接)", info.url, generation);

                self.start_generation(&scope, generation, session);
                lifecycle.scope = Some(scope);
                if let Some(retry) = lifecycle.retry.take() {
                    retry.cancel();
                }
                Ok(())
            }
            Err(e) => {
                warn!("[客户端] 连接到 {} 失败: {}", info.url, e);
                self.set_state(Self::state_after_failed_connect(lifecycle));
                config.handler.on_error(&e).await;
                Err(e)
            }
        }
    }

    /// 重连循环仍在运行时连接失败，状态回到 RETRYING 而不是停留在 CLOSED。
    fn state_after_failed_connect(lifecycle: &Lifecycle) -> ConnectionState {
        if lifecycle.retry.is_some() {
            ConnectionState::Retrying
        } else {
            ConnectionState::Closed
        }
    }

    async fn disconnect_locked(
        &self,
        lifecycle: &mut MutexGuard<'_, Lifecycle>,
        expected_generation: Option<u64>,
        code: u16,
        reason: &str,
        abnormal: bool,
    ) {
        if let Some(generation) = expected_generation {
            if lifecycle.generation != generation || lifecycle.scope.is_none() {
                debug!("[客户端] 忽略过期的断开请求 (第 {} 代连接)", generation);
                return;
            }
        }

        let was_connected = lifecycle.scope.is_some();
        self.set_state(ConnectionState::Closed);
        if was_connected {
            info!("[客户端] 连接关闭: {} ({})，异常: {}", code, reason, abnormal);
            self.inner.config.handler.on_closed(code, reason).await;
        }

        if let Some(current) = self.take_transport() {
            if current.transport.is_active() {
                if let Err(e) = current.transport.close(code, reason).await {
                    warn!("[客户端] 关闭第 {} 代连接的传输层失败: {}", current.generation, e);
                }
            }
        }
        if let Some(scope) = lifecycle.scope.take() {
            scope.cancel();
        }

        if abnormal {
            self.start_retry(lifecycle);
        } else if let Some(retry) = lifecycle.retry.take() {
            debug!("[客户端] 正常断开，停止重连循环");
            retry.cancel();
        }
    }

    fn start_retry(&self, lifecycle: &mut MutexGuard<'_, Lifecycle>) {
        if let Some(previous) = lifecycle.retry.take() {
            previous.cancel();
        }
        if self.inner.config.retry_policy.is_never() {
            debug!("[客户端] 重连策略为 Never，保持 CLOSED");
            return;
        }
        let token = CancellationToken::new();
        lifecycle.retry = Some(token.clone());
        self.set_state(ConnectionState::Retrying);

        let client = self.clone();
        tokio::spawn(async move { client.retry_loop(token).await });
    }

    async fn retry_loop(self, token: CancellationToken) {
        let policy = self.inner.config.retry_policy;
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let Some(delay) = policy.delay_for(attempt) else {
                return;
            };
            info!("[客户端] 第 {} 次重连将在 {:?} 后进行", attempt, delay);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut lifecycle = self.inner.lifecycle.lock().await;
            if token.is_cancelled() {
                return;
            }
            if self.state() == ConnectionState::Connected {
                return;
            }
            match self.connect_locked(&mut lifecycle).await {
                Ok(()) => {
                    info!("[客户端] 第 {} 次重连成功", attempt);
                    return;
                }
                Err(e) => {
                    debug!("[客户端] 第 {} 次重连失败: {}", attempt, e);
                    if token.is_cancelled() {
                        return;
                    }
                    self.set_state(ConnectionState::Retrying);
                }
            }
        }
    }

    /// 在独立任务中执行指定代连接的断开，避免后台任务取消自身。
    fn disconnect_detached(&self, generation: u64, code: u16, reason: String, abnormal: bool) {
        let client = self.clone();
        tokio::spawn(async move {
            let mut lifecycle = client.inner.lifecycle.lock().await;
            client
                .disconnect_locked(&mut lifecycle, Some(generation), code, &reason, abnormal)
                .await;
        });
    }

    fn start_generation(&self, scope: &ConnectionScope, generation: u64, session: TransportSession) {
        let TransportSession {
            transport,
            mut incoming,
        } = session;
        // 先于分发任务订阅，保证 on_connect 拿到的流不会漏掉第一条消息
        let messages = self.inner.messages.subscribe();
        let inbound_seen = Arc::new(AtomicBool::new(false));
        let (ping_tx, mut ping_rx) = mpsc::channel::<Vec<u8>>(16);
        let replies_to_ping = transport.replies_to_ping();

        // 帧分发
        {
            let client = self.clone();
            let inbound_seen = Arc::clone(&inbound_seen);
            scope.spawn(async move {
                let converter = &client.inner.config.converter;
                let kind = converter.kind();
                while let Some(frame) = incoming.recv().await {
                    inbound_seen.store(true, Ordering::SeqCst);
                    match frame {
                        Frame::Ping(_) if replies_to_ping => debug!("[客户端] 收到 Ping，由传输层自动回复"),
                        Frame::Ping(payload) => {
                            if ping_tx.send(payload).await.is_err() {
                                return;
                            }
                        }
                        Frame::Pong(_) => debug!("[客户端] 收到 Pong"),
                        data if kind.accepts(&data) => match converter.decode_downstream(&data) {
                            Ok(message) => {
                                // 没有订阅者时丢弃即可
                                let _ = client.inner.messages.send(message);
                            }
                            Err(e) => {
                                error!("[客户端] 入站帧解码失败: {}", e);
                                client.inner.config.handler.on_error(&e).await;
                                client.disconnect_detached(
                                    generation,
                                    close_code::INCOMING_FRAME_ERROR,
                                    close_reason::INCOMING_FRAME_ERROR.to_string(),
                                    true,
                                );
                                return;
                            }
                        },
                        other => debug!("[客户端] 忽略 {} 帧", other.kind_name()),
                    }
                }
            });
        }

        // Ping 响应
        {
            let transport = Arc::clone(&transport);
            scope.spawn(async move {
                while let Some(payload) = ping_rx.recv().await {
                    if let Err(e) = transport.send(Frame::Pong(payload)).await {
                        debug!("[客户端] 回复 Pong 失败: {}", e);
                    }
                }
            });
        }

        // 关闭监视
        {
            let client = self.clone();
            let transport = Arc::clone(&transport);
            scope.spawn(async move {
                let reason = transport.closed().await;
                let abnormal = client.is_abnormal(&reason);
                info!("[客户端] 传输层已关闭: {}，异常: {}", reason, abnormal);
                client.disconnect_detached(generation, reason.code, reason.reason, abnormal);
            });
        }

        // 健康检查
        if let Some(interval) = self.inner.config.health_check_interval {
            let client = self.clone();
            let transport = Arc::clone(&transport);
            scope.spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
                loop {
                    if let Err(e) = transport.send(Frame::Ping(Vec::new())).await {
                        debug!("[客户端] 健康检查发送 Ping 失败: {}", e);
                    }
                    ticker.tick().await;
                    if !inbound_seen.swap(false, Ordering::SeqCst) {
                        warn!("[客户端] 健康检查失败: {:?} 内没有收到任何帧", interval);
                        let reason = CloseReason::new(
                            close_code::HEALTH_CHECK_FAILED,
                            close_reason::HEALTH_CHECK_FAILED,
                        );
                        let abnormal = client.is_abnormal(&reason);
                        client.disconnect_detached(generation, reason.code, reason.reason, abnormal);
                        return;
                    }
                }
            });
        }

        let handler = Arc::clone(&self.inner.config.handler);
        let client = self.clone();
        scope.spawn(async move { handler.on_connect(client, messages).await });
    }
}
