use std::sync::Arc;

use crate::transport::Endpoint;

use super::{ClusterNode, TagFilter};

/// 不可变的集群快照。
///
/// # 设计背景（Why）
/// - 读路径（路由、扇出）远多于写路径（刷新），整体替换快照让读者无需加锁，
///   并且只能观察到刷新之前或之后的完整状态。
///
/// # 契约说明（What）
/// - `revision` 单调递增，每次发布加一；初始空快照为 0。
/// - `nodes` 按端点排序且端点唯一；构造时自动排序去重（后出现的同端点节点被丢弃）。
/// - 一经发布永不修改。
#[derive(Clone, Debug, Default)]
pub struct ClusterState {
    revision: u64,
    nodes: Vec<Arc<ClusterNode>>,
}

impl ClusterState {
    pub fn new(revision: u64, mut nodes: Vec<Arc<ClusterNode>>) -> Self {
        nodes.sort_by(|a, b| a.endpoint().cmp(b.endpoint()));
        nodes.dedup_by(|a, b| a.endpoint() == b.endpoint());
        Self { revision, nodes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn nodes(&self) -> &[Arc<ClusterNode>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 返回满足谓词的节点，保持端点顺序。
    pub fn matching(&self, filter: &TagFilter) -> Vec<Arc<ClusterNode>> {
        self.nodes
            .iter()
            .filter(|node| filter.matches(node.tags()))
            .cloned()
            .collect()
    }

    pub fn find(&self, endpoint: &Endpoint) -> Option<&Arc<ClusterNode>> {
        self.nodes
            .binary_search_by(|node| node.endpoint().cmp(endpoint))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.find(endpoint).is_some()
    }
}
