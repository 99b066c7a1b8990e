// rust_websocket_session/src/converter.rs

//! 内容转换器：把上行/下行类型映射为线上的文本帧或二进制帧。
//!
//! 转换器分三类：
//! - `Nothing`：显式禁用收发，任何编码/解码调用都返回 `WsError::ConverterDisabled`；
//! - `Text`：基于字符串的编解码（默认提供 JSON）；
//! - `Binary`：基于字节的编解码（默认提供 bincode）。
//!
//! 解码失败一律以 `Err` 返回，调用方负责把它当作协议错误处理。

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::WsError;
use crate::frame::Frame;

/// 可以在会话中收发的数据类型需要满足的约束。
pub trait WsData: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> WsData for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// 基于字符串的编解码器。
pub trait TextCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<String, WsError>;
    fn decode(&self, text: &str) -> Result<T, WsError>;
}

/// 基于字节的编解码器。
pub trait BinaryCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, WsError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, WsError>;
}

/// serde_json 文本编解码器。
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> TextCodec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<String, WsError> {
        serde_json::to_string(value)
            .map_err(|e| WsError::SerializationError(format!("JSON 编码失败: {}", e)))
    }

    fn decode(&self, text: &str) -> Result<T, WsError> {
        serde_json::from_str(text).map_err(|e| {
            WsError::DeserializationError(format!("JSON 解码失败: {}, 原始文本: '{}'", e, text))
        })
    }
}

/// bincode 二进制编解码器。
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T: Serialize + DeserializeOwned> BinaryCodec<T> for BincodeCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, WsError> {
        bincode::serialize(value)
            .map_err(|e| WsError::SerializationError(format!("bincode 编码失败: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, WsError> {
        bincode::deserialize(bytes).map_err(|e| {
            WsError::DeserializationError(format!("bincode 解码失败: {} ({} 字节)", e, bytes.len()))
        })
    }
}

/// 转换器对应的数据通道类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    None,
    Text,
    Binary,
}

impl ChannelKind {
    /// 该通道是否接收此帧。控制帧永远不会被接收。
    pub fn accepts(&self, frame: &Frame) -> bool {
        matches!(
            (self, frame),
            (ChannelKind::Text, Frame::Text(_)) | (ChannelKind::Binary, Frame::Binary(_))
        )
    }

    fn name(&self) -> &'static str {
        match self {
            ChannelKind::None => "none",
            ChannelKind::Text => "text",
            ChannelKind::Binary => "binary",
        }
    }
}

/// 上行类型 `U`（客户端 -> 服务端）与下行类型 `D`（服务端 -> 客户端）的内容转换器。
pub enum ContentConverter<U, D> {
    Nothing,
    Text {
        upstream: Arc<dyn TextCodec<U>>,
        downstream: Arc<dyn TextCodec<D>>,
    },
    Binary {
        upstream: Arc<dyn BinaryCodec<U>>,
        downstream: Arc<dyn BinaryCodec<D>>,
    },
}

impl<U, D> Clone for ContentConverter<U, D> {
    fn clone(&self) -> Self {
        match self {
            ContentConverter::Nothing => ContentConverter::Nothing,
            ContentConverter::Text {
                upstream,
                downstream,
            } => ContentConverter::Text {
                upstream: Arc::clone(upstream),
                downstream: Arc::clone(downstream),
            },
            ContentConverter::Binary {
                upstream,
                downstream,
            } => ContentConverter::Binary {
                upstream: Arc::clone(upstream),
                downstream: Arc::clone(downstream),
            },
        }
    }
}

impl<U, D> std::fmt::Debug for ContentConverter<U, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentConverter::{:?}", self.kind())
    }
}

impl<U, D> Default for ContentConverter<U, D> {
    fn default() -> Self {
        ContentConverter::Nothing
    }
}

impl<U: WsData, D: WsData> ContentConverter<U, D> {
    /// 双向均使用 JSON 文本帧。
    pub fn json() -> Self {
        ContentConverter::Text {
            upstream: Arc::new(JsonCodec),
            downstream: Arc::new(JsonCodec),
        }
    }

    /// 双向均使用 bincode 二进制帧。
    pub fn bincode() -> Self {
        ContentConverter::Binary {
            upstream: Arc::new(BincodeCodec),
            downstream: Arc::new(BincodeCodec),
        }
    }
}

impl<U, D> ContentConverter<U, D> {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ContentConverter::Nothing => ChannelKind::None,
            ContentConverter::Text { .. } => ChannelKind::Text,
            ContentConverter::Binary { .. } => ChannelKind::Binary,
        }
    }

    pub fn encode_upstream(&self, value: &U) -> Result<Frame, WsError> {
        match self {
            ContentConverter::Nothing => Err(WsError::ConverterDisabled("upstream encode")),
            ContentConverter::Text { upstream, .. } => upstream.encode(value).map(Frame::Text),
            ContentConverter::Binary { upstream, .. } => upstream.encode(value).map(Frame::Binary),
        }
    }

    pub fn decode_upstream(&self, frame: &Frame) -> Result<U, WsError> {
        match (self, frame) {
            (ContentConverter::Nothing, _) => Err(WsError::ConverterDisabled("upstream decode")),
            (ContentConverter::Text { upstream, .. }, Frame::Text(text)) => upstream.decode(text),
            (ContentConverter::Binary { upstream, .. }, Frame::Binary(bytes)) => {
                upstream.decode(bytes)
            }
            (_, other) => Err(self.unexpected(other)),
        }
    }

    pub fn encode_downstream(&self, value: &D) -> Result<Frame, WsError> {
        match self {
            ContentConverter::Nothing => Err(WsError::ConverterDisabled("downstream encode")),
            ContentConverter::Text { downstream, .. } => downstream.encode(value).map(Frame::Text),
            ContentConverter::Binary { downstream, .. } => {
                downstream.encode(value).map(Frame::Binary)
            }
        }
    }

    pub fn decode_downstream(&self, frame: &Frame) -> Result<D, WsError> {
        match (self, frame) {
            (ContentConverter::Nothing, _) => {
                Err(WsError::ConverterDisabled("downstream decode"))
            }
            (ContentConverter::Text { downstream, .. }, Frame::Text(text)) => {
                downstream.decode(text)
            }
            (ContentConverter::Binary { downstream, .. }, Frame::Binary(bytes)) => {
                downstream.decode(bytes)
            }
            (_, other) => Err(self.unexpected(other)),
        }
    }

    fn unexpected(&self, frame: &Frame) -> WsError {
        WsError::UnexpectedFrame {
            expected: self.kind().name(),
            actual: frame.kind_name(),
        }
    }
}
