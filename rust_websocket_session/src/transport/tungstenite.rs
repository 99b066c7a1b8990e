// rust_websocket_session/src/transport/tungstenite.rs

//! 基于 `tokio-tungstenite` 的真实 WebSocket 传输层。
//!
//! WebSocket 流在创建时被拆分为发送端 (`SplitSink`) 和接收端 (`SplitStream`)：
//! 发送端放在互斥锁之后供 `send` / `close` 共享；接收端交给一个读取任务，
//! 由它把底层消息转换为 `Frame` 并投递到入站通道，同时记录关闭原因。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use tokio_tungstenite::{WebSocketStream, connect_async};
use url::Url;

use super::{ConnectionInfo, Connector, DEFAULT_FRAME_BUFFER, Transport, TransportSession};
use crate::error::WsError;
use crate::frame::{CloseReason, Frame};

/// 一条 tokio-tungstenite WebSocket 连接。
pub struct TungsteniteTransport<S> {
    ws_sender: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    active: Arc<AtomicBool>,
    close_tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl<S> TungsteniteTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// 接管一个已经握手完成的 WebSocket 流，启动读取任务。
    pub fn spawn(ws_stream: WebSocketStream<S>, buffer: usize) -> TransportSession {
        let (ws_sender, ws_receiver) = ws_stream.split();
        let (frame_tx, frame_rx) = mpsc::channel(buffer.max(1));
        let (close_tx, _) = watch::channel(None);
        let active = Arc::new(AtomicBool::new(true));
        let close_tx = Arc::new(close_tx);

        tokio::spawn(read_loop(
            ws_receiver,
            frame_tx,
            Arc::clone(&active),
            Arc::clone(&close_tx),
        ));

        TransportSession {
            transport: Arc::new(TungsteniteTransport {
                ws_sender: Mutex::new(ws_sender),
                active,
                close_tx,
            }),
            incoming: frame_rx,
        }
    }
}

/// 只记录第一次出现的关闭原因。
fn record_close(close_tx: &watch::Sender<Option<CloseReason>>, reason: CloseReason) {
    close_tx.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(reason);
            true
        } else {
            false
        }
    });
}

async fn read_loop<S>(
    mut ws_receiver: SplitStream<WebSocketStream<S>>,
    frame_tx: mpsc::Sender<Frame>,
    active: Arc<AtomicBool>,
    close_tx: Arc<watch::Sender<Option<CloseReason>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    while let Some(msg_result) = ws_receiver.next().await {
        let frame = match msg_result {
            Ok(Message::Text(text)) => Frame::Text(text),
            Ok(Message::Binary(data)) => Frame::Binary(data),
            Ok(Message::Ping(data)) => Frame::Ping(data),
            Ok(Message::Pong(data)) => Frame::Pong(data),
            Ok(Message::Close(close_frame)) => {
                debug!("[传输层] 收到 Close 控制帧: {:?}", close_frame);
                let reason = match close_frame {
                    Some(frame) => CloseReason::new(u16::from(frame.code), frame.reason.into_owned()),
                    None => CloseReason::normal(),
                };
                active.store(false, Ordering::SeqCst);
                record_close(&close_tx, reason);
                // 继续读取，让 tungstenite 完成关闭握手直到流结束
                continue;
            }
            Ok(Message::Frame(_)) => continue,
            Err(TungsteniteError::ConnectionClosed) | Err(TungsteniteError::AlreadyClosed) => {
                debug!("[传输层] WebSocket 连接已关闭。");
                break;
            }
            Err(e) => {
                warn!("[传输层] 从 WebSocket 流接收消息时发生底层错误: {}", e);
                break;
            }
        };
        if frame_tx.send(frame).await.is_err() {
            debug!("[传输层] 入站帧接收端已被丢弃，继续读取直到连接关闭。");
        }
    }
    active.store(false, Ordering::SeqCst);
    // 没有收到关闭帧就结束的流按连接丢失处理
    record_close(&close_tx, CloseReason::connection_lost());
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
        }
    }
}

#[async_trait]
impl<S> Transport for TungsteniteTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// tungstenite 在读取到 Ping 时已经排队了 Pong，下次读写时发出。
    fn replies_to_ping(&self) -> bool {
        true
    }

    async fn send(&self, frame: Frame) -> Result<(), WsError> {
        if !self.is_active() {
            return Err(WsError::SendErrorClosed);
        }
        debug!("[传输层] 发送 {} 帧 ({} 字节)", frame.kind_name(), frame.len());
        let mut ws_sender = self.ws_sender.lock().await;
        match ws_sender.send(Message::from(frame)).await {
            Ok(()) => Ok(()),
            Err(TungsteniteError::ConnectionClosed) | Err(TungsteniteError::AlreadyClosed) => {
                self.active.store(false, Ordering::SeqCst);
                Err(WsError::SendErrorClosed)
            }
            Err(e) => Err(WsError::WebSocketProtocolError(e)),
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), WsError> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        record_close(&self.close_tx, CloseReason::new(code, reason));
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        let mut ws_sender = self.ws_sender.lock().await;
        match ws_sender.send(Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            Err(TungsteniteError::ConnectionClosed) | Err(TungsteniteError::AlreadyClosed) => Ok(()),
            Err(e) => Err(WsError::WebSocketProtocolError(e)),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn closed(&self) -> CloseReason {
        let mut rx = self.close_tx.subscribe();
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

/// 通过 `connect_async` 打开真实 WebSocket 连接的连接器。
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    buffer: usize,
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_FRAME_BUFFER,
        }
    }
}

impl TungsteniteConnector {
    pub fn new(buffer: usize) -> Self {
        Self { buffer }
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, info: &ConnectionInfo) -> Result<TransportSession, WsError> {
        info!("[客户端] 开始尝试连接到 WebSocket 服务器，URL: {}", info.url);
        let parsed_url = Url::parse(&info.url)
            .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", info.url, e)))?;

        let mut request = parsed_url.as_str().into_client_request()?;
        for (name, value) in &info.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WsError::InvalidConfig(format!("无效的请求头名称 '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| WsError::InvalidConfig(format!("请求头 '{}' 的值无效: {}", name, e)))?;
            request.headers_mut().append(header_name, header_value);
        }

        match connect_async(request).await {
            Ok((ws_stream, response)) => {
                info!("[客户端] 已成功连接到 {} (HTTP 状态码: {})", info.url, response.status());
                debug!("[客户端] WebSocket 连接响应头: {:?}", response.headers());
                Ok(TungsteniteTransport::spawn(ws_stream, self.buffer))
            }
            Err(TungsteniteError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                warn!("[客户端] 连接到 {} 被拒绝: {}", info.url, e);
                Err(WsError::ConnectionRefused(format!("{}: {}", info.url, e)))
            }
            Err(e) => {
                error!("[客户端] 连接到 {} 失败，错误: {}", info.url, e);
                Err(WsError::WebSocketProtocolError(e))
            }
        }
    }
}
