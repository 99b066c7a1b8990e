use async_trait::async_trait;
use chat_sample::config;
use chat_sample::error::AppError;
use common_models::ws_payloads::{ChatMessage, ChatResponse};
use log::{LevelFilter, info, warn};
use rust_websocket_session::{
    ClientConfig, ClientHandler, Command, ConnectionInfo, ContentConverter, RetryPolicy, WsClient,
    WsError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// 连接后打个招呼，并打印收到的每条消息。
struct ChatPrinter;

#[async_trait]
impl ClientHandler<ChatMessage, ChatResponse> for ChatPrinter {
    async fn on_connect(
        &self,
        client: WsClient<ChatMessage, ChatResponse>,
        mut messages: broadcast::Receiver<ChatResponse>,
    ) {
        let hello = ChatMessage {
            text: "hello".to_string(),
        };
        if let Err(e) = client.send(&hello).await {
            warn!("[聊天客户端] 发送问候失败: {}", e);
        }
        loop {
            match messages.recv().await {
                Ok(response) => info!("[聊天客户端] 收到: {}", response.text),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[聊天客户端] 消息处理落后，跳过 {} 条", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_closed(&self, code: u16, reason: &str) {
        info!("[聊天客户端] 连接关闭: {} ({})", code, reason);
    }

    async fn on_error(&self, error: &WsError) {
        warn!("[聊天客户端] 连接错误: {}", error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    config::init_config();
    let settings = &config::get_config().client;
    let retry_delay = Duration::from_secs(settings.retry_delay_seconds);
    let retry_policy = RetryPolicy::fixed_delay(retry_delay).map_err(AppError::from)?;

    let mut client_config = ClientConfig::new(
        Arc::new(ConnectionInfo::new(settings.url.clone())),
        ContentConverter::bincode(),
    )
    .with_handler(Arc::new(ChatPrinter))
    .with_retry_policy(retry_policy);
    if let Some(interval) = settings.health_check_interval() {
        client_config = client_config.with_health_check(interval);
    }
    let client = WsClient::new(client_config);

    let mut states = client.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!("[聊天客户端] 状态: {}", state);
        }
    });

    // 首次连接失败不会触发重连循环，这里按同样的延迟手动重试
    while let Err(e) = client.execute(Command::Connect).await {
        warn!("[聊天客户端] 连接 {} 失败: {}，{:?} 后重试", settings.url, e, retry_delay);
        tokio::time::sleep(retry_delay).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("[聊天客户端] 收到退出信号，正在断开连接...");
    client.shutdown().await;
    Ok(())
}
