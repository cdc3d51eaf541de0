//! 集群配置：TOML 解析与变体构建。
//!
//! 配置只描述“用哪种实现、带什么参数”；具体实现由构建函数在启动时一次性选定并注入。

use std::{hash::Hash, sync::Arc, time::Duration};

use flare_core::{
    DefaultRateLimitedCache, Discovery, DisabledRateLimitedCache, Endpoint, NodeMetadata,
    RateLimitedCache, RateLimitedCacheOptions, StaticDiscovery, Tags, Transport,
    TransportRegistry,
};
use flare_transport_mem::{MemoryHub, MemoryTransport};
use flare_transport_tcp::TcpTransport;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{discovery::DnsDiscovery, manager::ClusterOptions, service::NodeService};

/// 配置解析与校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse cluster config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },
    #[error("`permits_per_second` must be a positive finite number, got {0}")]
    InvalidRate(f64),
}

/// 集群配置根节点。
///
/// # 契约说明（What）
/// - 所有时长以毫秒表示；缺省值见各字段的 `default_*` 函数。
/// - `tags` 为本节点在握手中对外宣告的标签，经 [`ClusterConfig::node_service`] 进入握手元数据。
/// - `discovery` 与 `index_cache` 以 `type` 字段区分变体。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub index_cache: IndexCacheConfig,
}

fn default_refresh_interval_ms() -> u64 {
    30_000
}

fn default_rpc_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            tags: Tags::default(),
            discovery: DiscoveryConfig::default(),
            index_cache: IndexCacheConfig::default(),
        }
    }
}

/// 发现策略。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryConfig {
    /// 固定端点列表，例如 `mem://a`、`tcp://10.0.0.1:1394`。
    Static {
        #[serde(default)]
        nodes: Vec<Endpoint>,
    },
    /// `host:port` 记录，每轮刷新重新解析。
    Dns {
        #[serde(default)]
        nodes: Vec<String>,
    },
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::Static { nodes: Vec::new() }
    }
}

/// 索引写入去重缓存的变体。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexCacheConfig {
    RateLimited {
        #[serde(default = "default_permits_per_second")]
        permits_per_second: f64,
        #[serde(default = "default_max_entries")]
        max_entries: usize,
        #[serde(default = "default_ttl_ms")]
        ttl_ms: u64,
    },
    Disabled,
}

fn default_permits_per_second() -> f64 {
    RateLimitedCacheOptions::default().permits_per_second
}

fn default_max_entries() -> usize {
    RateLimitedCacheOptions::default().max_entries
}

fn default_ttl_ms() -> u64 {
    RateLimitedCacheOptions::default().ttl.as_millis() as u64
}

impl Default for IndexCacheConfig {
    fn default() -> Self {
        Self::RateLimited {
            permits_per_second: default_permits_per_second(),
            max_entries: default_max_entries(),
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl ClusterConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("rpc_timeout_ms", self.rpc_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if let IndexCacheConfig::RateLimited {
            permits_per_second,
            max_entries,
            ttl_ms,
        } = self.index_cache
        {
            if !permits_per_second.is_finite() || permits_per_second <= 0.0 {
                return Err(ConfigError::InvalidRate(permits_per_second));
            }
            if max_entries == 0 {
                return Err(ConfigError::Zero {
                    field: "max_entries",
                });
            }
            if ttl_ms == 0 {
                return Err(ConfigError::Zero { field: "ttl_ms" });
            }
        }
        Ok(())
    }

    /// 集群管理器的时限参数。
    pub fn cluster_options(&self) -> ClusterOptions {
        ClusterOptions {
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn build_discovery(&self) -> Arc<dyn Discovery> {
        match &self.discovery {
            DiscoveryConfig::Static { nodes } => Arc::new(StaticDiscovery::new(nodes.iter().cloned())),
            DiscoveryConfig::Dns { nodes } => Arc::new(DnsDiscovery::new(nodes.iter().cloned())),
        }
    }

    /// 按 scheme 分派的传输：`mem://` 连接到 `hub` 中绑定的服务，`tcp://` 使用配置的建连时限。
    ///
    /// 其余 scheme 在建连时返回 [`flare_core::ErrorKind::Protocol`]。
    pub fn build_transport(&self, hub: MemoryHub) -> Arc<dyn Transport> {
        let tcp = TcpTransport::new()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        Arc::new(
            TransportRegistry::new()
                .with(Arc::new(MemoryTransport::new(hub)))
                .with(Arc::new(tcp)),
        )
    }

    /// 本节点的服务端：握手时宣告 `id` 与配置中的 `tags`。
    pub fn node_service(&self, id: impl Into<String>) -> NodeService {
        NodeService::new(NodeMetadata::new(id, self.tags.clone()))
    }

    pub fn build_index_cache<K>(&self) -> Arc<dyn RateLimitedCache<K>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        match self.index_cache {
            IndexCacheConfig::RateLimited {
                permits_per_second,
                max_entries,
                ttl_ms,
            } => Arc::new(DefaultRateLimitedCache::new(RateLimitedCacheOptions {
                permits_per_second,
                max_entries,
                ttl: Duration::from_millis(ttl_ms),
            })),
            IndexCacheConfig::Disabled => Arc::new(DisabledRateLimitedCache::new()),
        }
    }
}
