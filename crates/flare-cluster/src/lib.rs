#![deny(unsafe_code)]
#![doc = r#"
# flare-cluster

## 模块使命（Why）
- 维护“哪些节点存活、各自承载哪些分片”的注册表，并把一次逻辑请求扇出到匹配节点、合并为单一结果。

## 核心契约（What）
- [`ClusterManager`]：刷新轮次（发现 ∪ 直接注册 → 并发握手/重新校验 → 原子发布快照）、
  按标签谓词查询与扇出聚合。
- [`NodeService`]：节点侧的 `metadata` 握手与方法路由。
- [`DnsDiscovery`]：把 `host:port` 记录解析为 `tcp://ip:port` 端点。
- [`ClusterConfig`]：TOML 配置及其到发现策略、去重缓存变体的构建。
- [`suggest`]：集群范围的标签值建议。
- [`local`]：基于内存传输的进程内多节点集群。
- [`telemetry::install`]：一次性安装 `tracing` 全局 Subscriber。

## 实现策略（How）
- 快照以 `arc_swap::ArcSwap` 整体替换，读者永不加锁；并发刷新通过 `futures::future::Shared` 合并为同一轮。
- 所有 RPC 以 `tokio::time::timeout` 约束，超时计为节点级失败，由调用方选择的聚合策略决定整体成败。
"#]

pub mod config;
mod discovery;
pub mod local;
mod manager;
mod service;
pub mod suggest;
pub mod telemetry;

pub use config::{ClusterConfig, ConfigError, DiscoveryConfig, IndexCacheConfig};
pub use discovery::DnsDiscovery;
pub use local::{LocalCluster, LocalNode};
pub use manager::{ClusterManager, ClusterOptions, ProbeFailure, RefreshReport};
pub use service::{METADATA_METHOD, NodeService};
