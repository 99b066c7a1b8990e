// rust_websocket_session/src/frame.rs

//! 传输层上的帧与关闭原因定义。
//!
//! `Frame` 是传输层一次收发的最小单位。关闭帧不出现在 `Frame` 中，
//! 关闭事件统一通过 `Transport::closed()` 以 `CloseReason` 的形式交付。

use std::fmt;

/// 本库内部使用的关闭码。
pub mod close_code {
    /// 正常关闭。
    pub const NORMAL: u16 = 1000;
    /// 服务端主动关闭空闲/失活会话。
    pub const GOING_AWAY: u16 = 1001;
    /// 连接在未收到关闭帧的情况下断开（仅用于本地上报，不会写到线上）。
    pub const ABNORMAL: u16 = 1006;
    /// 违反策略，例如连接数超限。
    pub const POLICY_VIOLATION: u16 = 1008;
    /// 内部错误；与 `PING_TIMEOUT_REASON` 同时出现时视为异常关闭。
    pub const INTERNAL_ERROR: u16 = 1011;
    /// 客户端健康检查失败。
    pub const HEALTH_CHECK_FAILED: u16 = 4000;
    /// 收到的帧无法解码。
    pub const INCOMING_FRAME_ERROR: u16 = 4001;
}

/// 本库内部使用的关闭原因文本。
pub mod close_reason {
    pub const PING_TIMEOUT: &str = "Ping timeout";
    pub const INCOMING_FRAME_ERROR: &str = "incoming frame error";
    pub const SESSION_CLOSED_BY_SERVER: &str = "session closed by server";
    pub const HEALTH_CHECK_FAILED: &str = "health check failed";
    pub const CONNECTION_LIMIT_EXCEEDED: &str = "connection limit exceeded";
    pub const CONNECTION_LOST: &str = "connection lost";
    pub const CLOSE_NORMALLY: &str = "Close normally";
}

/// 传输层上的一帧数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

impl Frame {
    /// 帧类型名称，用于日志与错误信息。
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
        }
    }

    /// 载荷长度（字节）。
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 连接关闭的原因：关闭码加上原因文本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// 正常关闭 (1000)。
    pub fn normal() -> Self {
        Self::new(close_code::NORMAL, close_reason::CLOSE_NORMALLY)
    }

    /// 连接在没有关闭帧的情况下丢失 (1006)。
    pub fn connection_lost() -> Self {
        Self::new(close_code::ABNORMAL, close_reason::CONNECTION_LOST)
    }

    /// 传输层自身判定的 Ping 超时 (1011 + "Ping timeout")。
    pub fn is_ping_timeout(&self) -> bool {
        self.code == close_code::INTERNAL_ERROR && self.reason == close_reason::PING_TIMEOUT
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_timeout_requires_both_code_and_reason() {
        assert!(CloseReason::new(1011, "Ping timeout").is_ping_timeout());
        assert!(!CloseReason::new(1011, "internal").is_ping_timeout());
        assert!(!CloseReason::new(1000, "Ping timeout").is_ping_timeout());
    }

    #[test]
    fn frame_kind_and_len() {
        assert_eq!(Frame::Text("abc".into()).kind_name(), "text");
        assert_eq!(Frame::Binary(vec![1, 2]).len(), 2);
        assert!(Frame::Ping(Vec::new()).is_empty());
    }
}
