// rust_websocket_session/tests/server_transport_integration_test.rs

use std::net::SocketAddr;
use std::time::Duration;

use log::{LevelFilter, info};
use rust_websocket_session::server::ServerTransport;
use rust_websocket_session::transport::{ConnectionInfo, Connector, TungsteniteConnector};
use rust_websocket_session::{Frame, TransportSession, WsError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// 辅助函数：初始化日志，仅用于测试，避免多次初始化
fn init_test_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Info)
        .is_test(true)
        .try_init();
}

/// 在随机端口上启动服务器，把每个新连接的服务端一端交给测试。
async fn start_server() -> (SocketAddr, mpsc::UnboundedReceiver<TransportSession>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = listener.local_addr().expect("无法获取本地监听地址");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let on_connect = move |session: TransportSession, peer_addr: SocketAddr| {
            let tx = tx.clone();
            async move {
                info!("[Test Server] on_connect: 新的 WebSocket 连接来自 {}", peer_addr);
                let _ = tx.send(session);
            }
        };
        let _ = ServerTransport::serve(listener, on_connect).await;
    });

    info!("[Test Main] 服务器监听地址: {}", addr);
    (addr, rx)
}

async fn accept_next(rx: &mut mpsc::UnboundedReceiver<TransportSession>) -> TransportSession {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("等待服务端连接超时")
        .expect("服务器已退出")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frames_flow_between_client_and_server() {
    init_test_logger();
    let (addr, mut accepted) = start_server().await;

    let info = ConnectionInfo::new(format!("ws://{}", addr)).with_header("X-Client-Id", "test-1");
    let mut client = TungsteniteConnector::default()
        .open(&info)
        .await
        .expect("连接测试服务器失败");
    let mut server = accept_next(&mut accepted).await;

    client
        .transport
        .send(Frame::Text("Hello from client".to_string()))
        .await
        .unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), server.incoming.recv())
        .await
        .unwrap();
    assert_eq!(received, Some(Frame::Text("Hello from client".to_string())));

    server.transport.send(Frame::Binary(vec![0xde, 0xad])).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), client.incoming.recv())
        .await
        .unwrap();
    assert_eq!(received, Some(Frame::Binary(vec![0xde, 0xad])));

    // Ping 帧原样交给上层，由会话或客户端负责回复
    server.transport.send(Frame::Ping(b"hb".to_vec())).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), client.incoming.recv())
        .await
        .unwrap();
    assert_eq!(received, Some(Frame::Ping(b"hb".to_vec())));

    assert!(client.transport.is_active());
    assert!(server.transport.is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_code_and_reason_reach_the_peer() {
    init_test_logger();
    let (addr, mut accepted) = start_server().await;

    let client = TungsteniteConnector::default()
        .open(&ConnectionInfo::new(format!("ws://{}", addr)))
        .await
        .expect("连接测试服务器失败");
    let mut server = accept_next(&mut accepted).await;

    client
        .transport
        .close(4001, "incoming frame error")
        .await
        .unwrap();
    assert!(!client.transport.is_active());
    // 重复关闭是无操作
    client.transport.close(1000, "again").await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), server.transport.closed())
        .await
        .expect("服务端没有观察到关闭");
    assert_eq!(reason.code, 4001);
    assert_eq!(reason.reason, "incoming frame error");
    assert_eq!(client.transport.closed().await.code, 4001);

    let end = tokio::time::timeout(Duration::from_secs(5), server.incoming.recv())
        .await
        .unwrap();
    assert_eq!(end, None);
    assert!(matches!(
        client.transport.send(Frame::Text("late".to_string())).await,
        Err(WsError::SendErrorClosed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_to_closed_port_is_refused() {
    init_test_logger();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = TungsteniteConnector::default()
        .open(&ConnectionInfo::new(format!("ws://{}", addr)))
        .await;
    assert!(matches!(result, Err(WsError::ConnectionRefused(_))));
}

#[tokio::test]
async fn test_invalid_url_and_header_are_rejected() {
    init_test_logger();
    let connector = TungsteniteConnector::default();

    let result = connector.open(&ConnectionInfo::new("not a url")).await;
    assert!(matches!(result, Err(WsError::InvalidUrl(_))));

    let info = ConnectionInfo::new("ws://127.0.0.1:9").with_header("bad header", "x");
    let result = connector.open(&info).await;
    assert!(matches!(result, Err(WsError::InvalidConfig(_))));
}
