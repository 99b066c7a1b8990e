// rust_websocket_session/tests/client_state_machine_test.rs

//! 客户端状态机测试。全部运行在内存传输层与暂停的 Tokio 时钟上，
//! 15 秒起步的重连延迟不会消耗真实时间。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_models::ws_payloads::{ChatMessage, ChatResponse};
use rust_websocket_session::client::{ClientConfig, ClientHandler, Command, ConnectionState, WsClient};
use rust_websocket_session::transport::memory::MemoryConnector;
use rust_websocket_session::transport::{ConnectionInfo, EndpointProvider, MemoryAcceptor, TransportSession};
use rust_websocket_session::{ContentConverter, Frame, RetryPolicy, WsError};

fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    errors: AtomicUsize,
    closed: Mutex<Vec<(u16, String)>>,
}

impl Recorder {
    fn closed(&self) -> Vec<(u16, String)> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientHandler<ChatMessage, ChatResponse> for Recorder {
    async fn on_connect(
        &self,
        _client: WsClient<ChatMessage, ChatResponse>,
        _messages: tokio::sync::broadcast::Receiver<ChatResponse>,
    ) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_closed(&self, code: u16, reason: &str) {
        self.closed.lock().unwrap().push((code, reason.to_string()));
    }

    async fn on_error(&self, _error: &WsError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    client: WsClient<ChatMessage, ChatResponse>,
    connector: MemoryConnector,
    acceptor: MemoryAcceptor,
    recorder: Arc<Recorder>,
}

fn harness(retry_policy: RetryPolicy) -> Harness {
    harness_with(retry_policy, |config| config)
}

fn harness_with(
    retry_policy: RetryPolicy,
    customize: impl FnOnce(ClientConfig<ChatMessage, ChatResponse>) -> ClientConfig<ChatMessage, ChatResponse>,
) -> Harness {
    init_test_logger();
    let (connector, acceptor) = MemoryConnector::new(64);
    let recorder = Arc::new(Recorder::default());
    let endpoint = ConnectionInfo::new("ws://host/test").with_header("Authorization", "Bearer t0k3n");
    let config = ClientConfig::new(Arc::new(endpoint), ContentConverter::json())
        .with_connector(Arc::new(connector.clone()))
        .with_handler(recorder.clone())
        .with_retry_policy(retry_policy);
    Harness {
        client: WsClient::new(customize(config)),
        connector,
        acceptor,
        recorder,
    }
}

async fn wait_for_state(client: &WsClient<ChatMessage, ChatResponse>, target: ConnectionState) {
    let mut states = client.watch_state();
    tokio::time::timeout(Duration::from_secs(600), states.wait_for(|state| *state == target))
        .await
        .unwrap_or_else(|_| panic!("等待状态 {} 超时，当前状态 {}", target, client.state()))
        .expect("状态通道不应关闭");
}

async fn next_server_side(acceptor: &mut MemoryAcceptor) -> TransportSession {
    let (_, server_side) = tokio::time::timeout(Duration::from_secs(600), acceptor.recv())
        .await
        .expect("等待服务端连接超时")
        .expect("连接器已关闭");
    server_side
}

#[tokio::test(start_paused = true)]
async fn connect_then_disconnect_reaches_connected_then_closed() {
    let mut h = harness(RetryPolicy::Never);
    assert_eq!(h.client.state(), ConnectionState::Closed);

    h.client.execute(Command::Connect).await.expect("连接应当成功");
    assert_eq!(h.client.state(), ConnectionState::Connected);

    let (info, mut server_side) = h.acceptor.recv().await.unwrap();
    assert_eq!(info.url, "ws://host/test");
    assert_eq!(info.headers[0], ("Authorization".to_string(), "Bearer t0k3n".to_string()));

    // 已连接时再次 Connect 是无操作
    h.client.execute(Command::Connect).await.unwrap();
    assert_eq!(h.connector.attempts(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.recorder.connects.load(Ordering::SeqCst), 1);

    h.client.execute(Command::disconnect_normally()).await.unwrap();
    assert_eq!(h.client.state(), ConnectionState::Closed);
    assert_eq!(server_side.incoming.recv().await, None);
    assert_eq!(server_side.transport.closed().await.code, 1000);
    assert_eq!(h.recorder.closed(), vec![(1000, "Close normally".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn connect_to_unreachable_endpoint_fails_and_reports_error() {
    let h = harness(RetryPolicy::fixed_delay(Duration::from_secs(15)).unwrap());
    h.connector.set_reachable(false);

    let result = h.client.execute(Command::Connect).await;
    assert!(matches!(result, Err(WsError::ConnectionRefused(_))));
    assert_eq!(h.client.state(), ConnectionState::Closed);
    assert_eq!(h.recorder.errors.load(Ordering::SeqCst), 1);

    // 手动 Connect 失败不会启动重连
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_open_a_single_transport() {
    let mut h = harness(RetryPolicy::Never);

    let (first, second) = tokio::join!(
        h.client.execute(Command::Connect),
        h.client.execute(Command::Connect)
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.client.state(), ConnectionState::Connected);

    let _server_side = next_server_side(&mut h.acceptor).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.recorder.connects.load(Ordering::SeqCst), 1);
}

/// 第一次生成连接信息失败，之后轮换到新的令牌。
struct RotatingEndpoint {
    builds: AtomicUsize,
}

#[async_trait]
impl EndpointProvider for RotatingEndpoint {
    async fn build(&self) -> Result<ConnectionInfo, WsError> {
        match self.builds.fetch_add(1, Ordering::SeqCst) {
            0 => Err(WsError::Endpoint("token service unavailable".to_string())),
            n => Ok(ConnectionInfo::new("ws://host/test").with_header("Authorization", format!("Bearer {}", n))),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn endpoint_provider_is_consulted_before_every_attempt() {
    init_test_logger();
    let (connector, mut acceptor) = MemoryConnector::new(64);
    let recorder = Arc::new(Recorder::default());
    let endpoint = Arc::new(RotatingEndpoint {
        builds: AtomicUsize::new(0),
    });
    let client = WsClient::new(
        ClientConfig::<ChatMessage, ChatResponse>::new(endpoint.clone(), ContentConverter::json())
            .with_connector(Arc::new(connector.clone()))
            .with_handler(recorder.clone()),
    );

    let result = client.execute(Command::Connect).await;
    assert!(matches!(result, Err(WsError::Endpoint(_))));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(connector.attempts(), 0);
    assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);

    client.execute(Command::Connect).await.unwrap();
    let (info, _server_side) = acceptor.recv().await.unwrap();
    assert_eq!(info.headers[0], ("Authorization".to_string(), "Bearer 1".to_string()));
    assert_eq!(endpoint.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_manual_connect_during_retry_keeps_retrying_state() {
    let mut h = harness(RetryPolicy::fixed_delay(Duration::from_secs(15)).unwrap());
    h.client.execute(Command::Connect).await.unwrap();
    let server_side = next_server_side(&mut h.acceptor).await;

    h.connector.set_reachable(false);
    server_side.transport.close(4500, "gone").await.unwrap();
    wait_for_state(&h.client, ConnectionState::Retrying).await;

    assert!(h.client.execute(Command::Connect).await.is_err());
    assert_eq!(h.client.state(), ConnectionState::Retrying);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.state(), ConnectionState::Retrying);

    // 重连循环没有被打断，恢复可达后自行连上
    h.connector.set_reachable(true);
    wait_for_state(&h.client, ConnectionState::Connected).await;
    assert_eq!(h.connector.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_retries_until_endpoint_is_reachable_again() {
    let mut h = harness(RetryPolicy::fixed_delay(Duration::from_secs(15)).unwrap());
    h.client.execute(Command::Connect).await.unwrap();
    let server_side = next_server_side(&mut h.acceptor).await;

    h.connector.set_reachable(false);
    server_side.transport.close(1011, "Ping timeout").await.unwrap();
    wait_for_state(&h.client, ConnectionState::Retrying).await;
    assert_eq!(h.recorder.closed(), vec![(1011, "Ping timeout".to_string())]);

    // 15 秒、30 秒各尝试一次，均失败，状态回到 RETRYING
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(h.connector.attempts(), 3);
    assert_eq!(h.client.state(), ConnectionState::Retrying);

    h.connector.set_reachable(true);
    wait_for_state(&h.client, ConnectionState::Connected).await;
    assert_eq!(h.connector.attempts(), 4);
    let _reconnected = next_server_side(&mut h.acceptor).await;

    // 重连成功后循环退出，不再有新的尝试
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.attempts(), 4);
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.recorder.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_spaces_attempts_by_growing_delays() {
    let policy = RetryPolicy::exponential_backoff(Duration::from_secs(15), Duration::from_secs(60)).unwrap();
    let mut h = harness(policy);
    h.client.execute(Command::Connect).await.unwrap();
    let server_side = next_server_side(&mut h.acceptor).await;

    h.connector.set_reachable(false);
    server_side.transport.close(4500, "gone").await.unwrap();
    wait_for_state(&h.client, ConnectionState::Retrying).await;

    // 延迟依次为 15, 19.95, 26.53...：第 14 秒时还没有尝试，第 16 秒时一次，第 36 秒时两次
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(h.connector.attempts(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.connector.attempts(), 2);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.connector.attempts(), 3);

    h.client.execute(Command::disconnect_normally()).await.unwrap();
    assert_eq!(h.client.state(), ConnectionState::Closed);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.connector.attempts(), 3, "正常断开应停止重连循环");
}

#[tokio::test(start_paused = true)]
async fn normal_close_from_peer_does_not_retry() {
    let mut h = harness(RetryPolicy::fixed_delay(Duration::from_secs(15)).unwrap());
    h.client.execute(Command::Connect).await.unwrap();
    let server_side = next_server_side(&mut h.acceptor).await;

    server_side.transport.close(1000, "bye").await.unwrap();
    wait_for_state(&h.client, ConnectionState::Closed).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.client.state(), ConnectionState::Closed);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.recorder.closed(), vec![(1000, "bye".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn never_policy_stays_closed_after_abnormal_close() {
    let mut h = harness(RetryPolicy::Never);
    h.client.execute(Command::Connect).await.unwrap();
    let server_side = next_server_side(&mut h.acceptor).await;

    server_side.transport.close(1011, "Ping timeout").await.unwrap();
    wait_for_state(&h.client, ConnectionState::Closed).await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.client.state(), ConnectionState::Closed);
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn custom_predicates_decide_what_is_abnormal() {
    let mut h = harness_with(
        RetryPolicy::fixed_delay(Duration::from_secs(15)).unwrap(),
        |config| {
            config
                .with_abnormal_close_code(|_| false)
                .with_abnormal_close_reason(|reason| reason.contains("maintenance"))
        },
    );
    h.client.execute(Command::Connect).await.unwrap();
    let first = next_server_side(&mut h.acceptor).await;

    // 关闭码不再被视为异常
    first.transport.close(4500, "kicked").await.unwrap();
    wait_for_state(&h.client, ConnectionState::Closed).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.attempts(), 1);

    // 原因谓词命中时仍然重连
    h.client.execute(Command::Connect).await.unwrap();
    let second = next_server_side(&mut h.acceptor).await;
    second.transport.close(1000, "server maintenance").await.unwrap();
    wait_for_state(&h.client, ConnectionState::Retrying).await;
    wait_for_state(&h.client, ConnectionState::Connected).await;
    assert_eq!(h.connector.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn undecodable_frame_closes_with_4001_after_reporting_error() {
    let mut h = harness(RetryPolicy::Never);
    h.client.execute(Command::Connect).await.unwrap();
    let mut server_side = next_server_side(&mut h.acceptor).await;

    server_side
        .transport
        .send(Frame::Text("{ definitely not json".to_string()))
        .await
        .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), server_side.transport.closed())
        .await
        .expect("客户端应当关闭连接");
    assert_eq!(reason.code, 4001);
    assert_eq!(reason.reason, "incoming frame error");
    assert_eq!(server_side.incoming.recv().await, None);

    wait_for_state(&h.client, ConnectionState::Closed).await;
    assert_eq!(h.recorder.errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.recorder.closed(), vec![(4001, "incoming frame error".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn send_and_receive_require_a_connection() {
    let mut h = harness(RetryPolicy::Never);
    let hello = ChatMessage {
        text: "hello".to_string(),
    };
    assert!(matches!(h.client.send(&hello).await, Err(WsError::NotConnected)));
    assert!(matches!(
        h.client.receive(Duration::from_secs(1)).await,
        Err(WsError::NotConnected)
    ));
    // 没有活动连接时控制帧命令是无操作
    h.client
        .execute(Command::Ping { payload: vec![1] })
        .await
        .expect("未连接时 Ping 不应报错");

    h.client.execute(Command::Connect).await.unwrap();
    let mut server_side = next_server_side(&mut h.acceptor).await;

    h.client.send(&hello).await.unwrap();
    assert_eq!(
        server_side.incoming.recv().await,
        Some(Frame::Text(r#"{"text":"hello"}"#.to_string()))
    );

    assert!(matches!(
        h.client.receive(Duration::from_secs(5)).await,
        Err(WsError::Timeout(_))
    ));

    let mut stream = h.client.subscribe();
    let (received, sent) = tokio::join!(
        h.client.receive(Duration::from_secs(5)),
        server_side
            .transport
            .send(Frame::Text(r#"{"text":"world"}"#.to_string()))
    );
    sent.unwrap();
    assert_eq!(received.unwrap().text, "world");
    // receive 不会从其他订阅者那里拿走消息
    assert_eq!(stream.recv().await.unwrap().text, "world");
}

#[tokio::test(start_paused = true)]
async fn ping_and_pong_commands_and_automatic_pong_reply() {
    let mut h = harness(RetryPolicy::Never);
    h.client.execute(Command::Connect).await.unwrap();
    let mut server_side = next_server_side(&mut h.acceptor).await;

    h.client
        .execute(Command::Ping {
            payload: b"are you there".to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(
        server_side.incoming.recv().await,
        Some(Frame::Ping(b"are you there".to_vec()))
    );

    h.client
        .execute(Command::Pong { payload: vec![9] })
        .await
        .unwrap();
    assert_eq!(server_side.incoming.recv().await, Some(Frame::Pong(vec![9])));

    server_side.transport.send(Frame::Ping(vec![7, 7])).await.unwrap();
    assert_eq!(server_side.incoming.recv().await, Some(Frame::Pong(vec![7, 7])));
}

#[tokio::test(start_paused = true)]
async fn reconnect_uses_a_fresh_transport_and_drops_the_old_one() {
    let mut h = harness(RetryPolicy::Never);
    h.client.execute(Command::Connect).await.unwrap();
    let first = next_server_side(&mut h.acceptor).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.client.execute(Command::disconnect_normally()).await.unwrap();
    h.client.execute(Command::Connect).await.unwrap();
    let second = next_server_side(&mut h.acceptor).await;

    assert!(matches!(
        first
            .transport
            .send(Frame::Text(r#"{"text":"stale"}"#.to_string()))
            .await,
        Err(WsError::SendErrorClosed)
    ));
    let mut messages = h.client.subscribe();
    second
        .transport
        .send(Frame::Text(r#"{"text":"fresh"}"#.to_string()))
        .await
        .unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.text, "fresh");
    assert_eq!(h.client.state(), ConnectionState::Connected);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.recorder.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn health_check_disconnects_a_silent_peer_with_4000() {
    let mut h = harness_with(RetryPolicy::Never, |config| {
        config.with_health_check(Duration::from_secs(20))
    });
    h.client.execute(Command::Connect).await.unwrap();
    let mut server_side = next_server_side(&mut h.acceptor).await;

    assert_eq!(server_side.incoming.recv().await, Some(Frame::Ping(Vec::new())));
    let reason = tokio::time::timeout(Duration::from_secs(60), server_side.transport.closed())
        .await
        .expect("健康检查应当断开连接");
    assert_eq!(reason.code, 4000);
    assert_eq!(reason.reason, "health check failed");
    wait_for_state(&h.client, ConnectionState::Closed).await;
}

#[tokio::test(start_paused = true)]
async fn health_check_keeps_a_responsive_peer_connected() {
    let mut h = harness_with(RetryPolicy::Never, |config| {
        config.with_health_check(Duration::from_secs(20))
    });
    h.client.execute(Command::Connect).await.unwrap();
    let TransportSession {
        transport,
        mut incoming,
    } = next_server_side(&mut h.acceptor).await;

    let responder = tokio::spawn(async move {
        while let Some(frame) = incoming.recv().await {
            if let Frame::Ping(payload) = frame {
                let _ = transport.send(Frame::Pong(payload)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(h.client.state(), ConnectionState::Connected);

    h.client.shutdown().await;
    assert_eq!(h.client.state(), ConnectionState::Closed);
    responder.await.unwrap();
}
