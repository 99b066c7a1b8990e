// rust_websocket_session/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! - `state`：连接状态 `ConnectionState` 与命令 `Command`；
//! - `config`：`ClientConfig` 与生命周期回调 `ClientHandler`；
//! - `connection`：状态机本体 `WsClient`。

pub mod config;
pub mod connection;
pub mod state;

pub use config::{ClientConfig, ClientHandler, NoopClientHandler};
pub use connection::WsClient;
pub use state::{Command, ConnectionState};
