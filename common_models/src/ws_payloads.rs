// common_models/src/ws_payloads.rs

//! 包含 WebSocket 通信中使用的各种 Payload 结构体定义。

use serde::{Deserialize, Serialize};

/// EchoPayload 是一个简单的负载，用于测试 WebSocket 通信。
/// 它包含一个字符串内容，期望被服务器回显。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EchoPayload {
    /// 需要回显的内容。
    pub content: String,
}

/// 客户端发往服务端的聊天消息（上行）。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
}

/// 服务端发往客户端的聊天消息（下行）。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub text: String,
}

impl From<ChatMessage> for ChatResponse {
    fn from(message: ChatMessage) -> Self {
        ChatResponse { text: message.text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_payload_serialization_deserialization() {
        let original_payload = EchoPayload {
            content: "你好，WebSocket!".to_string(),
        };

        let serialized = serde_json::to_string(&original_payload).expect("序列化 EchoPayload 失败");
        assert_eq!(serialized, r#"{"content":"你好，WebSocket!"}"#);

        let deserialized: EchoPayload = serde_json::from_str(&serialized).expect("反序列化 EchoPayload 失败");
        assert_eq!(deserialized, original_payload);
    }

    #[test]
    fn test_chat_message_json_shape() {
        let message = ChatMessage {
            text: "hello".to_string(),
        };
        assert_eq!(serde_json::to_string(&message).unwrap(), r#"{"text":"hello"}"#);
        let response: ChatResponse = message.into();
        assert_eq!(response.text, "hello");
    }
}
