use std::collections::BTreeSet;

use futures::FutureExt;

use crate::{BoxFuture, Result, transport::Endpoint};

/// 服务发现契约：产出候选对等端点集合。
///
/// # 契约说明（What）
/// - `resolve` 返回本轮的完整候选集合；空集合合法，表示当前没有对等节点。
/// - 网络或解析失败时返回 [`crate::ErrorKind::Discovery`]，调用方在下一轮重试，不影响已发布的快照。
/// - 实现可以在每次调用时重新解析（DNS），也可以返回固定列表。
pub trait Discovery: Send + Sync + 'static {
    fn resolve(&self) -> BoxFuture<'static, Result<BTreeSet<Endpoint>>>;
}

/// 返回配置好的固定端点列表。
#[derive(Clone, Debug, Default)]
pub struct StaticDiscovery {
    endpoints: BTreeSet<Endpoint>,
}

impl StaticDiscovery {
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
        }
    }

    pub fn endpoints(&self) -> &BTreeSet<Endpoint> {
        &self.endpoints
    }
}

impl Discovery for StaticDiscovery {
    fn resolve(&self) -> BoxFuture<'static, Result<BTreeSet<Endpoint>>> {
        let endpoints = self.endpoints.clone();
        async move { Ok(endpoints) }.boxed()
    }
}
