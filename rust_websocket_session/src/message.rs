// rust_websocket_session/src/message.rs

//! 分布式会话集群在背板上传递的广播信封。
//!
//! 信封携带发布节点的 ID、唯一的消息 ID、时间戳，以及序列化为 JSON 字符串的下行载荷。
//! 信封本身同样以 JSON 形式在背板上传输。

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WsError;

/// 背板上的一条广播消息。
///
/// # 字段
/// - `message_id`: UUID v4 字符串，用于追踪单次广播。
/// - `node_id`: 发布该广播的集群节点 ID。
/// - `payload`: 下行载荷的 JSON 字符串。
/// - `timestamp`: 创建时的 UTC 毫秒时间戳。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BroadcastEnvelope {
    pub message_id: String,
    pub node_id: String,
    pub payload: String,
    pub timestamp: i64,
}

impl BroadcastEnvelope {
    /// 把 `payload_data` 序列化为 JSON 并装入新信封。
    pub fn new<T: Serialize>(node_id: Uuid, payload_data: &T) -> Result<Self, WsError> {
        let payload = serde_json::to_string(payload_data).map_err(|e| {
            WsError::SerializationError(format!("创建广播信封时序列化载荷失败: {}", e))
        })?;
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            payload,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, WsError> {
        serde_json::from_str(&self.payload).map_err(|e| {
            WsError::DeserializationError(format!(
                "广播信封载荷反序列化失败: {}, 原始载荷: '{}'",
                e, self.payload
            ))
        })
    }

    /// 编码为背板上传输的字节。
    pub fn to_bytes(&self) -> Result<Vec<u8>, WsError> {
        serde_json::to_vec(self)
            .map_err(|e| WsError::SerializationError(format!("广播信封编码失败: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WsError> {
        serde_json::from_slice(bytes)
            .map_err(|e| WsError::DeserializationError(format!("广播信封解码失败: {}", e)))
    }

    /// 是否由指定节点发布。
    pub fn is_from(&self, node_id: Uuid) -> bool {
        self.node_id == node_id.to_string()
    }
}
