use std::hash::Hash;

use dashmap::DashMap;

use super::RateLimitedCache;

/// 不限流、不回调的实现，只做“不存在才插入”。
///
/// 用于关闭索引写入去重的部署：依旧保证同一键只放行一次，但既不计入 `size`，也不会触发回调。
#[derive(Debug)]
pub struct DisabledRateLimitedCache<K>
where
    K: Hash + Eq,
{
    seen: DashMap<K, ()>,
}

impl<K> DisabledRateLimitedCache<K>
where
    K: Hash + Eq,
{
    pub fn new() -> Self {
        Self {
            seen: DashMap::new(),
        }
    }
}

impl<K> Default for DisabledRateLimitedCache<K>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> RateLimitedCache<K> for DisabledRateLimitedCache<K>
where
    K: Hash + Eq + Send + Sync,
{
    fn acquire(&self, key: K, _cache_hit: &dyn Fn(), _rate_limited: &dyn Fn()) -> bool {
        self.seen.insert(key, ()).is_none()
    }

    fn size(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn first_acquire_wins_and_never_calls_back() {
        let cache = DisabledRateLimitedCache::new();
        let callbacks = Cell::new(0);
        let bump = || callbacks.set(callbacks.get() + 1);

        assert!(cache.acquire("series-a", &bump, &bump));
        assert!(!cache.acquire("series-a", &bump, &bump));
        assert!(cache.acquire("series-b", &bump, &bump));

        assert_eq!(callbacks.get(), 0);
        assert_eq!(cache.size(), 0);
    }
}
