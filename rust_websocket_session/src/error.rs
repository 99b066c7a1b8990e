// rust_websocket_session/src/error.rs

//! 定义 WebSocket 会话库相关的错误类型。
//!
//! 错误大致分为四类：
//! - 传输错误（连接失败、中途断开）：通过 `on_error` / `on_closed` 上报，可能触发重连；
//! - 协议/解码错误（载荷格式不正确）：总是以 4001 异常关闭连接，不会导致进程崩溃；
//! - 容量错误（`ConnectionLimit`）：同步返回给 `add` 的调用方，不重试；
//! - 使用错误（在已关闭的连接上 `send` / `receive`）：同步返回，由调用方负责。

use std::time::Duration;

use thiserror::Error; // 引入 thiserror 来简化错误类型的定义

/// WebSocket 会话库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当载荷序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当载荷反序列化失败时返回。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// WebSocket 协议相关的错误（握手失败、连接被重置等）。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 当尝试向一个已关闭的传输层发送帧时发生。
    #[error("发送错误: 传输层已关闭")]
    SendErrorClosed,

    /// 对端不可达（连接被拒绝）。
    #[error("连接被拒绝: {0}")]
    ConnectionRefused(String),

    /// 无效的 URL 格式。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 端点提供者无法生成连接信息。
    #[error("端点提供者错误: {0}")]
    Endpoint(String),

    /// 未连接错误，当尝试在未建立连接时进行操作。
    #[error("未连接")]
    NotConnected,

    /// 服务端会话已经关闭。
    #[error("会话已关闭")]
    SessionClosed,

    /// 等待消息超时。
    #[error("等待消息超时 ({0:?})")]
    Timeout(Duration),

    /// 会话集群已达到最大连接数。
    #[error("连接数已达上限 ({max})")]
    ConnectionLimit { max: usize },

    /// 收到的帧类型与内容转换器的通道类型不符。
    #[error("非预期的帧类型: 期望 {expected}，实际 {actual}")]
    UnexpectedFrame {
        expected: &'static str,
        actual: &'static str,
    },

    /// 内容转换器在该方向上被禁用 (`ContentConverter::Nothing`)。
    #[error("内容转换器已禁用: {0}")]
    ConverterDisabled(&'static str),

    /// 重试策略参数不合法。
    #[error("无效的重试策略: {0}")]
    InvalidRetryPolicy(String),

    /// 配置项不合法。
    #[error("无效的配置: {0}")]
    InvalidConfig(String),

    /// 发布/订阅背板错误。
    #[error("背板错误: {0}")]
    Backplane(String),

    /// 通用消息错误，用于其他未明确分类的错误。
    #[error("消息错误: {0}")]
    Message(String),
}

impl WsError {
    /// 是否属于协议/解码类错误（总是以 4001 关闭连接）。
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            WsError::DeserializationError(_) | WsError::UnexpectedFrame { .. }
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for WsError {
    fn from(e: redis::RedisError) -> Self {
        WsError::Backplane(e.to_string())
    }
}
