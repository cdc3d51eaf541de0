//! 进程内多节点集群。
//!
//! 多个节点服务以逻辑名绑定到同一个 [`MemoryHub`]（`mem://a`、`mem://b`……），
//! 每个节点带有 `shard=<name>` 标签，并通过同一份静态列表互相发现。
//! 主要用于集成测试与示例，故障可通过 [`LocalCluster::hub`] 注入。

use std::sync::Arc;

use flare_core::{CoreError, Discovery, Endpoint, NodeMetadata, StaticDiscovery, Tags, Transport};
use flare_transport_mem::{MemoryHub, MemoryTransport};
use futures::future;

use crate::{
    manager::{ClusterManager, ClusterOptions, RefreshReport},
    service::NodeService,
};

/// 标识节点分片的标签键。
pub const SHARD_TAG: &str = "shard";

type Configure = Box<dyn FnOnce(NodeService) -> NodeService>;

/// [`LocalCluster`] 构造器。
pub struct LocalClusterBuilder {
    options: ClusterOptions,
    hub: MemoryHub,
    nodes: Vec<(String, Configure)>,
}

impl LocalClusterBuilder {
    /// 使用已有的 hub，便于预先绑定额外的端点。
    pub fn with_hub(mut self, hub: MemoryHub) -> Self {
        self.hub = hub;
        self
    }

    pub fn node(self, name: impl Into<String>) -> Self {
        self.node_with(name, |service| service)
    }

    /// 添加节点，并在绑定前为其服务追加路由。
    pub fn node_with(
        mut self,
        name: impl Into<String>,
        configure: impl FnOnce(NodeService) -> NodeService + 'static,
    ) -> Self {
        self.nodes.push((name.into(), Box::new(configure)));
        self
    }

    /// 绑定全部节点服务并为每个节点创建集群管理器；不会触发刷新。
    pub fn build(self) -> Result<LocalCluster, CoreError> {
        let mut endpoints = Vec::with_capacity(self.nodes.len());
        let mut services = Vec::with_capacity(self.nodes.len());
        for (name, configure) in self.nodes {
            let endpoint = Endpoint::memory(name.as_str())?;
            let tags = Tags::new().with(SHARD_TAG, name.as_str());
            let service = configure(NodeService::new(NodeMetadata::new(name.as_str(), tags)));
            services.push((name, service));
            endpoints.push(endpoint);
        }

        let discovery: Arc<dyn Discovery> = Arc::new(StaticDiscovery::new(endpoints.iter().cloned()));
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new(self.hub.clone()));

        let mut nodes = Vec::with_capacity(services.len());
        for ((name, service), endpoint) in services.into_iter().zip(endpoints) {
            self.hub.bind(name.as_str(), Arc::new(service))?;
            nodes.push(LocalNode {
                name,
                endpoint,
                manager: ClusterManager::new(
                    Arc::clone(&transport),
                    Arc::clone(&discovery),
                    self.options,
                ),
            });
        }

        Ok(LocalCluster {
            hub: self.hub,
            nodes,
        })
    }
}

/// 本地集群中的一个节点。
#[derive(Clone, Debug)]
pub struct LocalNode {
    pub name: String,
    pub endpoint: Endpoint,
    pub manager: ClusterManager,
}

/// 共享一个内存 hub 的多节点集群，每个节点拥有独立的集群管理器。
#[derive(Debug)]
pub struct LocalCluster {
    hub: MemoryHub,
    nodes: Vec<LocalNode>,
}

impl LocalCluster {
    pub fn builder(options: ClusterOptions) -> LocalClusterBuilder {
        LocalClusterBuilder {
            options,
            hub: MemoryHub::new(),
            nodes: Vec::new(),
        }
    }

    /// 以默认路由启动一组节点。
    pub fn with_nodes<I, S>(names: I, options: ClusterOptions) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .fold(Self::builder(options), |builder, name| builder.node(name))
            .build()
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    pub fn nodes(&self) -> &[LocalNode] {
        &self.nodes
    }

    pub fn manager(&self, name: &str) -> Option<&ClusterManager> {
        self.nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| &node.manager)
    }

    /// 所有管理器并发刷新一轮。
    pub async fn refresh_all(&self) -> Result<Vec<RefreshReport>, CoreError> {
        future::try_join_all(self.nodes.iter().map(|node| node.manager.refresh())).await
    }

    /// 停止全部管理器并解绑服务。
    pub async fn shutdown(self) {
        future::join_all(self.nodes.iter().map(|node| node.manager.stop())).await;
        for node in &self.nodes {
            self.hub.unbind(&node.name);
        }
    }
}
