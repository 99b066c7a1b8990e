//! `chat_sample` 示例库。
//!
//! 为 `chat_server` 与 `chat_client` 两个可执行程序提供共享的配置加载 (`config`)
//! 与错误类型 (`error`)。

pub mod config;
pub mod error;
