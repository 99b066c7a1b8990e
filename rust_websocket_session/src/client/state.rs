// rust_websocket_session/src/client/state.rs

//! 客户端连接状态与命令。

use std::fmt;

/// 客户端连接状态。初始状态为 `Closed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Connected,
    Retrying,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Retrying => "RETRYING",
        };
        f.write_str(name)
    }
}

/// 驱动客户端状态机的命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 建立连接；已处于 `Connected` 时为无操作。
    Connect,
    /// 断开连接。`abnormal` 为真时按重连策略启动重连。
    Disconnect {
        code: u16,
        reason: String,
        abnormal: bool,
    },
    /// 发送 Ping 控制帧；没有活动连接时为无操作。
    Ping { payload: Vec<u8> },
    /// 发送 Pong 控制帧；没有活动连接时为无操作。
    Pong { payload: Vec<u8> },
}

impl Command {
    /// 以 1000 正常关闭。
    pub fn disconnect_normally() -> Self {
        Command::Disconnect {
            code: crate::frame::close_code::NORMAL,
            reason: crate::frame::close_reason::CLOSE_NORMALLY.to_string(),
            abnormal: false,
        }
    }
}
