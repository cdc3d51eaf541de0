use std::sync::Arc;

use crate::{BoxFuture, Result};

use super::{Endpoint, Request, Response};

/// 传输实现统一封装建连流程。
///
/// # 设计背景（Why）
/// - 节点只是一个不透明的 RPC 端点；内存模拟与真实 TCP 必须可以互相替换，
///   集群管理器不得感知任何传输专有类型。
///
/// # 契约说明（What）
/// - `scheme`：实现支持的协议方案，如 `mem`、`tcp`。
/// - `connect`：建立到端点的逻辑通道；无法到达时返回 [`crate::ErrorKind::Connectivity`]。
/// - **前置条件**：`endpoint.scheme()` 与 [`Transport::scheme`] 匹配；不匹配时实现应返回协议错误。
///
/// # 风险提示（Trade-offs）
/// - `connect` 自身不设超时，调用方负责以 `tokio::time::timeout` 等手段约束。
pub trait Transport: Send + Sync + 'static {
    /// 返回支持的 scheme。
    fn scheme(&self) -> &str;

    /// 连接端点。
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Arc<dyn Channel>>>;
}

/// 到远端端点的逻辑通道。
///
/// # 契约说明（What）
/// - `send`：发送一次请求并等待响应；失败分类为连通性、超时、协议或对端内部错误。
/// - `close`：释放底层资源；关闭后的 `send` 返回 [`crate::ErrorKind::Closed`]。
/// - 同一通道允许被多个任务并发调用 `send`，实现自行决定串行化策略。
pub trait Channel: Send + Sync + 'static {
    fn endpoint(&self) -> &Endpoint;

    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response>>;

    fn close(&self) -> BoxFuture<'static, ()>;
}

/// 服务端处理契约：每个入站请求产出一个响应或失败。
///
/// 处理器返回的错误会按原分类回传给调用方。
pub trait RpcHandler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Response>>;
}

impl<F> RpcHandler for F
where
    F: Fn(Request) -> BoxFuture<'static, Result<Response>> + Send + Sync + 'static,
{
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
        self(request)
    }
}
