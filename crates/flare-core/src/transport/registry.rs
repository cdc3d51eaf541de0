use std::{collections::BTreeMap, fmt, sync::Arc};

use futures::FutureExt;

use crate::{
    BoxFuture, Result,
    error::{CoreError, ErrorKind, codes},
};

use super::{Channel, Endpoint, Transport};

/// 按 scheme 分派的传输注册表。
///
/// # 设计背景（Why）
/// - 选择哪种传输是构造期决定的配置，而非运行期的类型探测；注册表在装配阶段一次性填充。
///
/// # 契约说明（What）
/// - 注册表本身也实现 [`Transport`]，可以直接交给集群管理器。
/// - 未注册的 scheme 在 `connect` 时返回 [`ErrorKind::Protocol`]，错误码为
///   [`codes::TRANSPORT_UNSUPPORTED_SCHEME`]。
/// - 重复注册同一 scheme 时后者覆盖前者。
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: BTreeMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以构建者风格注册传输。
    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        self.transports
            .insert(transport.scheme().to_ascii_lowercase(), transport);
    }

    pub fn get(&self, scheme: &str) -> Option<&Arc<dyn Transport>> {
        self.transports.get(scheme)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("schemes", &self.transports.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Transport for TransportRegistry {
    fn scheme(&self) -> &str {
        "*"
    }

    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Arc<dyn Channel>>> {
        match self.transports.get(endpoint.scheme()) {
            Some(transport) => transport.connect(endpoint),
            None => {
                let err = CoreError::new(
                    ErrorKind::Protocol,
                    codes::TRANSPORT_UNSUPPORTED_SCHEME,
                    format!("no transport registered for `{endpoint}`"),
                );
                async move { Err(err) }.boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_scheme_is_protocol_error() {
        let registry = TransportRegistry::new();
        let endpoint: Endpoint = "quic://a:1".parse().expect("endpoint");
        let err = match registry.connect(&endpoint).await {
            Ok(_) => panic!("connect must fail without a registered transport"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.code(), codes::TRANSPORT_UNSUPPORTED_SCHEME);
    }
}
