use std::{collections::BTreeMap, fmt, sync::Arc};

use flare_core::{
    BoxFuture, CoreError, ErrorKind, NodeMetadata, Request, Response, RpcHandler, error::codes,
};
use futures::FutureExt;

/// 握手使用的方法名。
pub const METADATA_METHOD: &str = "metadata";

/// 单个节点对外暴露的 RPC 服务。
///
/// # 教案式说明
/// - **意图（Why）**：集群管理器通过 `metadata` 握手获知节点的标识、协议版本与标签；
///   业务方法（例如标签值建议）与握手共用同一个端点。
/// - **逻辑（How）**：`metadata` 直接以 JSON 返回本节点的 [`NodeMetadata`]；
///   其他方法按名称分派给注册的处理器。
/// - **契约（What）**：未注册的方法返回 [`ErrorKind::Protocol`]，错误码为
///   [`codes::PROTOCOL_UNKNOWN_METHOD`]；路由表在服务构造完成后不可变。
#[derive(Clone)]
pub struct NodeService {
    metadata: NodeMetadata,
    routes: BTreeMap<String, Arc<dyn RpcHandler>>,
}

impl NodeService {
    pub fn new(metadata: NodeMetadata) -> Self {
        Self {
            metadata,
            routes: BTreeMap::new(),
        }
    }

    /// 为方法注册处理器；同名方法以后注册者为准，`metadata` 不可被覆盖。
    pub fn route(mut self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) -> Self {
        let method = method.into();
        if method != METADATA_METHOD {
            self.routes.insert(method, handler);
        }
        self
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl fmt::Debug for NodeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeService")
            .field("metadata", &self.metadata)
            .field("methods", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RpcHandler for NodeService {
    fn handle(&self, request: Request) -> BoxFuture<'static, flare_core::Result<Response>> {
        if request.method() == METADATA_METHOD {
            let response = Response::json(&self.metadata);
            return async move { response }.boxed();
        }
        match self.routes.get(request.method()) {
            Some(handler) => handler.handle(request),
            None => {
                let err = CoreError::new(
                    ErrorKind::Protocol,
                    codes::PROTOCOL_UNKNOWN_METHOD,
                    format!("unknown method `{}`", request.method()),
                );
                async move { Err(err) }.boxed()
            }
        }
    }
}
