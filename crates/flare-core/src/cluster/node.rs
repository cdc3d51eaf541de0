use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::transport::{Channel, Endpoint};

use super::Tags;

/// 节点标识，由节点在握手时自报。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// `metadata` 握手返回的节点元数据。
///
/// # 契约说明（What）
/// - `version` 为对端的协议版本，与 [`crate::PROTOCOL_VERSION`] 不一致即视为不兼容。
/// - `tags` 决定节点归属的分片。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub id: NodeId,
    pub version: u32,
    #[serde(default)]
    pub tags: Tags,
}

impl NodeMetadata {
    /// 以当前协议版本构造元数据。
    pub fn new(id: impl Into<String>, tags: Tags) -> Self {
        Self {
            id: NodeId::new(id),
            version: crate::PROTOCOL_VERSION,
            tags,
        }
    }
}

/// 扇出结果中标识节点的轻量句柄，不持有通道。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdentity {
    pub endpoint: Endpoint,
    pub id: NodeId,
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.endpoint)
    }
}

/// 注册表中的一个存活节点。
///
/// # 契约说明（What）
/// - 节点对象不可变；存活性体现为它是否出现在最新发布的 [`super::ClusterState`] 中。
/// - 同一节点在多个快照之间共享同一个 `Arc`，通道也因此在重新校验成功后得以复用。
pub struct ClusterNode {
    endpoint: Endpoint,
    metadata: NodeMetadata,
    channel: Arc<dyn Channel>,
}

impl ClusterNode {
    pub fn new(endpoint: Endpoint, metadata: NodeMetadata, channel: Arc<dyn Channel>) -> Self {
        Self {
            endpoint,
            metadata,
            channel,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn id(&self) -> &NodeId {
        &self.metadata.id
    }

    pub fn tags(&self) -> &Tags {
        &self.metadata.tags
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            endpoint: self.endpoint.clone(),
            id: self.metadata.id.clone(),
        }
    }
}

impl fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterNode")
            .field("endpoint", &self.endpoint)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
