use std::borrow::Cow;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CoreError, ErrorKind, codes};

/// 单次 RPC 的请求。
///
/// `method` 决定对端路由到哪个处理器，`payload` 为不透明字节，通常是 JSON。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    method: Cow<'static, str>,
    payload: Bytes,
}

impl Request {
    pub fn new(method: impl Into<Cow<'static, str>>, payload: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            payload: payload.into(),
        }
    }

    /// 以 JSON 编码负载构造请求。
    pub fn json<T: Serialize + ?Sized>(
        method: impl Into<Cow<'static, str>>,
        body: &T,
    ) -> Result<Self, CoreError> {
        Ok(Self::new(method, encode(body)?))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 将负载解码为 `T`；失败视为协议错误。
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        decode(&self.payload)
    }

    pub fn into_parts(self) -> (Cow<'static, str>, Bytes) {
        (self.method, self.payload)
    }
}

/// 单次 RPC 的响应。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    payload: Bytes,
}

impl Response {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// 以 JSON 编码负载构造响应。
    pub fn json<T: Serialize + ?Sized>(body: &T) -> Result<Self, CoreError> {
        Ok(Self::new(encode(body)?))
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// 将负载解码为 `T`；负载格式错误时返回 [`ErrorKind::Protocol`]。
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        decode(&self.payload)
    }
}

fn encode<T: Serialize + ?Sized>(body: &T) -> Result<Bytes, CoreError> {
    serde_json::to_vec(body).map(Bytes::from).map_err(|err| {
        CoreError::new(
            ErrorKind::Protocol,
            codes::PROTOCOL_ENCODE,
            format!("failed to encode payload: {err}"),
        )
        .with_cause(err)
    })
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CoreError> {
    serde_json::from_slice(payload).map_err(|err| {
        CoreError::new(
            ErrorKind::Protocol,
            codes::PROTOCOL_DECODE,
            format!("failed to decode payload: {err}"),
        )
        .with_cause(err)
    })
}
