use std::collections::BTreeSet;

use flare_core::{BoxFuture, CoreError, Discovery, Endpoint, ErrorKind, error::codes};
use futures::{FutureExt, future};
use tracing::debug;

/// 通过运行时解析器把 `host:port` 记录解析为 `tcp://ip:port` 端点。
///
/// # 逻辑 (How)
/// - 每次 `resolve` 都重新查询全部记录，记录之间并发解析；
/// - 一条记录解析出的多个地址全部成为候选端点，重复地址自然去重。
///
/// # 契约 (What)
/// - 任一记录解析失败即整轮失败，返回 [`ErrorKind::Discovery`]，已发布的快照保持不变；
/// - 解析结果为空集合是合法的。
#[derive(Clone, Debug, Default)]
pub struct DnsDiscovery {
    records: Vec<String>,
}

impl DnsDiscovery {
    pub fn new(records: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            records: records.into_iter().map(Into::into).collect(),
        }
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }
}

impl Discovery for DnsDiscovery {
    fn resolve(&self) -> BoxFuture<'static, flare_core::Result<BTreeSet<Endpoint>>> {
        let records = self.records.clone();
        async move {
            let lookups = records.into_iter().map(|record| async move {
                let addrs = tokio::net::lookup_host(record.as_str())
                    .await
                    .map_err(|err| {
                        CoreError::new(
                            ErrorKind::Discovery,
                            codes::DISCOVERY_RESOLVE,
                            format!("failed to resolve `{record}`"),
                        )
                        .with_cause(err)
                    })?;
                Ok::<_, CoreError>(addrs.map(Endpoint::tcp).collect::<Vec<_>>())
            });
            let resolved: BTreeSet<Endpoint> = future::try_join_all(lookups)
                .await?
                .into_iter()
                .flatten()
                .collect();
            debug!(endpoints = resolved.len(), "dns discovery resolved");
            Ok(resolved)
        }
        .boxed()
    }
}
