//! `common_models` 公共模型库 crate。
//!
//! 集中定义示例聊天服务端、客户端以及 `rust_websocket_session` 的测试之间共享的
//! WebSocket 消息负载。所有模型都派生 `Serialize`、`Deserialize`、`Debug`、`Clone`，
//! 以便同时用于 JSON 与 bincode 两种内容转换器。

pub mod ws_payloads; // WebSocket 通信中使用的各种消息负载结构体
