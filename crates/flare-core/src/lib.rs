#![deny(unsafe_code)]
#![doc = "flare-core: 分布式指标存储集群协调层的核心契约。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：查询与写入需要跨越一组动态变化的节点路由，并在部分节点失败时合并为单一结果；本 crate 固化这一层的公共语言。"]
#![doc = "- **What**：传输/协议契约、节点与标签模型、不可变集群快照、服务发现、托管资源生命周期、去重限流缓存以及结果聚合策略。"]
#![doc = "- **How**：所有契约均以对象安全 Trait + [`BoxFuture`] 表达，运行时无关；具体传输（内存、TCP）与集群管理器位于独立 crate。"]

pub mod aggregate;
pub mod cache;
pub mod cluster;
pub mod error;
pub mod future;
pub mod resource;
pub mod suggest;
pub mod transport;

pub use aggregate::{
    AggregateError, Aggregator, AllSucceed, BestEffort, FanOutResult, FirstSuccess, NodeFailure,
    NodeOutcome, Partial, aggregate_fn,
};
pub use cache::{
    DefaultRateLimitedCache, DisabledRateLimitedCache, RateLimitedCache, RateLimitedCacheOptions,
};
pub use cluster::{
    ClusterNode, ClusterState, Discovery, NodeId, NodeIdentity, NodeMetadata, StaticDiscovery,
    TagFilter, Tags,
};
pub use error::{CoreError, ErrorCause, ErrorKind};
pub use future::BoxFuture;
pub use resource::{ManagedResource, ResourceSetup, ResourceState};
pub use transport::{
    Channel, Endpoint, Request, Response, RpcHandler, Transport, TransportRegistry,
};

/// 集群握手协议版本。
///
/// 握手时对端返回的版本号与本地不一致，即视为协议不兼容，节点不会被加入注册表。
pub const PROTOCOL_VERSION: u32 = 1;

/// 统一的返回别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;
