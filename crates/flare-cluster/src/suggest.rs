//! 集群范围的标签值建议。
//!
//! 每个节点以 [`TagValuesSuggestHandler`] 暴露本地索引，调用方通过
//! [`suggest_tag_values`] 向匹配节点扇出，并以尽力而为策略合并。

use std::{
    cell::Cell,
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use flare_core::{
    BestEffort, BoxFuture, RateLimitedCache, Request, Response, RpcHandler, TagFilter, Tags,
    suggest::{DateRange, SuggestError, Suggestion, TagValuesSuggest, TagValuesSuggestRequest},
};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::debug;

use crate::manager::ClusterManager;

/// 标签值建议使用的方法名。
pub const SUGGEST_TAG_VALUES_METHOD: &str = "suggest_tag_values";

/// 索引写入的时间分桶宽度。
pub const INDEX_BUCKET: Duration = Duration::from_secs(3600);

/// 一次索引写入的去向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexWrite {
    /// 首次写入，已进入索引。
    Indexed,
    /// 同一序列在同一分桶内已经写过。
    Cached,
    /// 被限流，未写入。
    RateLimited,
    /// 缓存拒绝但未给出原因（禁用缓存的重复写入）。
    Skipped,
}

/// 以内存结构应答标签值建议的节点后端。
///
/// # 契约说明（What）
/// - 索引以 `(序列标签, 小时分桶)` 为单位；同一单位的写入由 [`RateLimitedCache`] 去重，
///   只有第一个获取者真正写入；
/// - 建议只统计标签满足 `filter`、且至少一个分桶与 `range` 相交的序列；
/// - `exclude` 中的键不出现在结果中；`limit` 与 `group_limit` 在本地先行应用，
///   合并时再次应用。
pub struct MemorySuggestBackend {
    index: RwLock<BTreeMap<Tags, BTreeSet<u64>>>,
    writes: Arc<dyn RateLimitedCache<(Tags, u64)>>,
}

impl fmt::Debug for MemorySuggestBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySuggestBackend")
            .field("series", &self.index.read().len())
            .field("cached_writes", &self.writes.size())
            .finish()
    }
}

impl MemorySuggestBackend {
    pub fn new(writes: Arc<dyn RateLimitedCache<(Tags, u64)>>) -> Self {
        Self {
            index: RwLock::new(BTreeMap::new()),
            writes,
        }
    }

    /// 记录序列在 `timestamp`（Unix 毫秒）时刻有写入。
    pub fn write(&self, tags: Tags, timestamp: u64) -> IndexWrite {
        let bucket = timestamp / bucket_millis();
        let hit = Cell::new(false);
        let limited = Cell::new(false);
        let first = self.writes.acquire(
            (tags.clone(), bucket),
            &|| hit.set(true),
            &|| limited.set(true),
        );
        if !first {
            return if hit.get() {
                IndexWrite::Cached
            } else if limited.get() {
                debug!(bucket, "index write rate limited");
                IndexWrite::RateLimited
            } else {
                IndexWrite::Skipped
            };
        }
        self.index.write().entry(tags).or_default().insert(bucket);
        IndexWrite::Indexed
    }

    pub fn series(&self) -> usize {
        self.index.read().len()
    }

    /// 基于本地索引回答建议请求。
    pub fn suggest(&self, request: &TagValuesSuggestRequest) -> TagValuesSuggest {
        let width = bucket_millis();
        let index = self.index.read();
        let mut values: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for (tags, buckets) in index.iter() {
            if !request.filter.matches(tags) {
                continue;
            }
            let seen = buckets.iter().any(|bucket| {
                let start = bucket.saturating_mul(width);
                DateRange::new(start, start.saturating_add(width))
                    .is_ok_and(|span| span.overlaps(&request.range))
            });
            if !seen {
                continue;
            }
            for (key, value) in tags.iter() {
                if !request.exclude.contains(key) {
                    values.entry(key).or_default().insert(value.to_owned());
                }
            }
        }

        let local = TagValuesSuggest {
            suggestions: values
                .into_iter()
                .map(|(key, values)| Suggestion {
                    key: key.to_owned(),
                    values,
                    limited: false,
                })
                .collect(),
            ..TagValuesSuggest::default()
        };
        TagValuesSuggest::reduce([local], request.limit, request.group_limit)
    }
}

fn bucket_millis() -> u64 {
    INDEX_BUCKET.as_millis() as u64
}

/// 把 [`MemorySuggestBackend`] 暴露为 RPC 处理器：请求与响应均为 JSON。
#[derive(Clone, Debug)]
pub struct TagValuesSuggestHandler {
    backend: Arc<MemorySuggestBackend>,
}

impl TagValuesSuggestHandler {
    pub fn new(backend: Arc<MemorySuggestBackend>) -> Self {
        Self { backend }
    }
}

impl RpcHandler for TagValuesSuggestHandler {
    fn handle(&self, request: Request) -> BoxFuture<'static, flare_core::Result<Response>> {
        let reply = request
            .decode::<TagValuesSuggestRequest>()
            .and_then(|request| Response::json(&self.backend.suggest(&request)));
        async move { reply }.boxed()
    }
}

/// 向满足 `nodes` 谓词的节点扇出建议请求，尽力而为地合并。
///
/// 节点失败不会使整体失败，而是作为 `errors` 出现在结果中。
pub fn suggest_tag_values(
    manager: &ClusterManager,
    nodes: &TagFilter,
    request: TagValuesSuggestRequest,
) -> BoxFuture<'static, TagValuesSuggest> {
    let (limit, group_limit) = (request.limit, request.group_limit);
    let merged = manager.fan_out::<TagValuesSuggest, _, _>(
        nodes,
        |_| Request::json(SUGGEST_TAG_VALUES_METHOD, &request),
        BestEffort::collect(),
    );
    async move {
        let partial = merged.await;
        let mut result = TagValuesSuggest::reduce(partial.value, limit, group_limit);
        result
            .errors
            .extend(partial.failures.iter().map(SuggestError::from));
        result
    }
    .boxed()
}
