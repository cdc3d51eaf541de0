//! 节点、标签与集群快照模型。
//!
//! 节点对本层而言只是一个不透明的 RPC 端点加一组标签；分片由标签谓词 [`TagFilter`] 选取。

mod discovery;
mod node;
mod state;
mod tags;

pub use discovery::{Discovery, StaticDiscovery};
pub use node::{ClusterNode, NodeId, NodeIdentity, NodeMetadata};
pub use state::ClusterState;
pub use tags::{TagFilter, Tags};
