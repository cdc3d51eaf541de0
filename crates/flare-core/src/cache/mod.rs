//! 按键去重的获取缓存。
//!
//! 用于守护昂贵的写入（例如索引写入）：同一个键在缓存视野内只有第一次获取会放行，
//! 其余调用通过回调得知“命中”或“被限流”。两种实现共享同一契约，但不共享代码。

mod disabled;
mod rate_limited;

pub use disabled::DisabledRateLimitedCache;
pub use rate_limited::{DefaultRateLimitedCache, RateLimitedCacheOptions};

/// 去重获取契约。
///
/// # 契约说明（What）
/// - `acquire` 返回 `true` 表示调用方是该键的“第一个”，应继续执行受保护的操作，此时不触发任何回调。
/// - 返回 `false` 时，实现至多调用 `cache_hit` 与 `rate_limited` 中的一个；是否调用取决于具体实现。
/// - `size` 返回当前跟踪的键数量；禁用实现恒为 0。
/// - 任意并发下，同一键在同一缓存视野内只有一个调用方得到 `true`。
///
/// # 设计取舍与风险（Trade-offs）
/// - `acquire` 为同步、非阻塞调用：判定只涉及内存结构与令牌桶，没有 I/O，
///   让调用方能在任何 Future 内部直接使用，无需额外的挂起点。
/// - 限流不是错误，只通过回调暴露。
pub trait RateLimitedCache<K>: Send + Sync {
    fn acquire(&self, key: K, cache_hit: &dyn Fn(), rate_limited: &dyn Fn()) -> bool;

    fn size(&self) -> usize;
}
