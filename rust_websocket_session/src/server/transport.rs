// rust_websocket_session/src/server/transport.rs

//! 服务端 WebSocket 监听与连接接受。

use std::net::SocketAddr;

use log::{error, info};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::error::WsError;
use crate::transport::tungstenite::TungsteniteTransport;
use crate::transport::{DEFAULT_FRAME_BUFFER, TransportSession};

/// `ServerTransport` 负责 WebSocket 服务端的监听和连接接受。
pub struct ServerTransport;

impl ServerTransport {
    /// 绑定地址并开始接受连接。
    ///
    /// 每个成功完成握手的连接都会以 `TransportSession` 的形式交给 `on_connect`，
    /// 回调在独立的 Tokio 任务中执行。监听器绑定失败时返回错误，否则永不返回。
    pub async fn start<F, Fut>(addr: SocketAddr, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(TransportSession, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&addr).await?;
        Self::serve(listener, on_connect).await
    }

    /// 在一个已经绑定的监听器上接受连接。测试中可以先绑定 `127.0.0.1:0` 再读取实际端口。
    pub async fn serve<F, Fut>(listener: TcpListener, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(TransportSession, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        info!("[传输层] WebSocket 服务器正在监听地址: {}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("[传输层] 从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();

                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("[传输层] 与 {} 的 WebSocket 握手成功", peer_addr);
                                let session = TungsteniteTransport::spawn(ws_stream, DEFAULT_FRAME_BUFFER);
                                on_connect_callback(session, peer_addr).await;
                            }
                            Err(e) => {
                                error!("[传输层] 与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    // 单次 accept 失败不影响监听
                    error!("[传输层] 接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}
