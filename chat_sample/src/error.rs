use rust_websocket_session::WsError;
use thiserror::Error;

/// 示例应用的错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("WebSocket 服务错误: {0}")]
    WebSocketService(#[from] WsError),

    #[error("配置错误: {0}")]
    ConfigError(String),
}
