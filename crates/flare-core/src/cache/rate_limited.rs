use std::{
    hash::Hash,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::RateLimitedCache;

/// [`DefaultRateLimitedCache`] 的构造参数。
///
/// - `permits_per_second`：令牌桶的补充速率，同时作为桶容量（至少 1）。
/// - `max_entries`：跟踪键数量上限（至少 1）；超过时先清理过期项，再淘汰最早插入的键。
/// - `ttl`：缓存视野，超过该时长的条目视为不存在。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitedCacheOptions {
    pub permits_per_second: f64,
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for RateLimitedCacheOptions {
    fn default() -> Self {
        Self {
            permits_per_second: 100.0,
            max_entries: 100_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// 令牌桶：按时间流逝补充，桶满后不再累积。
#[derive(Debug)]
struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(permits_per_second: f64) -> Self {
        let rate = if permits_per_second.is_finite() && permits_per_second > 0.0 {
            permits_per_second
        } else {
            1.0
        };
        let capacity = rate.max(1.0);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 非阻塞地尝试取走一个令牌。
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// 带令牌桶限流、容量上限与过期时间的去重缓存。
///
/// # 逻辑解析（How）
/// 1. 键已存在且未过期：调用 `cache_hit`，返回 `false`；
/// 2. 令牌桶无可用令牌：调用 `rate_limited`，返回 `false`；
/// 3. 在准入锁内复核：键在此期间已被他人插入则视为命中；否则先腾出容量、预留计数，再插入。
///    已过期的旧条目在这一步被原地替换，不占用新容量。
///
/// # 契约说明（What）
/// - 同一键在 TTL 内只有一个调用方拿到 `true`。
/// - 任意时刻 `size()` 不超过 `max_entries`，且不超过出现过的不同键数量。
///
/// # 设计取舍与风险（Trade-offs）
/// - 命中路径不加准入锁；新键的插入与淘汰在准入锁内串行执行。
/// - 第 1 步与第 3 步之间存在窗口：并发的首批调用者可能都消耗令牌，但只有一个会插入成功。
/// - 超出容量时的淘汰需要扫描全表，只在表满时发生。
/// - `size()` 读取的是预留计数：删除后才归还、插入前先预留，因此只会短暂高于实际条目数。
#[derive(Debug)]
pub struct DefaultRateLimitedCache<K>
where
    K: Hash + Eq,
{
    entries: DashMap<K, Instant>,
    /// 已预留的条目数，是 `size()` 的来源。
    reserved: AtomicUsize,
    /// 串行化所有改变条目数量的操作。
    admission: Mutex<()>,
    limiter: TokenBucket,
    max_entries: usize,
    ttl: Duration,
}

impl<K> DefaultRateLimitedCache<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new(options: RateLimitedCacheOptions) -> Self {
        Self {
            entries: DashMap::new(),
            reserved: AtomicUsize::new(0),
            admission: Mutex::new(()),
            limiter: TokenBucket::new(options.permits_per_second),
            max_entries: options.max_entries.max(1),
            ttl: options.ttl,
        }
    }

    fn is_fresh(&self, inserted_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(inserted_at) < self.ttl
    }

    /// 腾出至少一个空位；调用方必须持有准入锁。
    fn make_room(&self, now: Instant) {
        if self.entries.len() < self.max_entries {
            return;
        }
        let mut expired = 0;
        self.entries.retain(|_, inserted_at| {
            let fresh = self.is_fresh(*inserted_at, now);
            if !fresh {
                expired += 1;
            }
            fresh
        });
        self.reserved.fetch_sub(expired, Ordering::AcqRel);

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone());
            let Some(key) = oldest else {
                break;
            };
            if self.entries.remove(&key).is_some() {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

impl<K> RateLimitedCache<K> for DefaultRateLimitedCache<K>
where
    K: Hash + Eq + Clone + Send + Sync,
{
    fn acquire(&self, key: K, cache_hit: &dyn Fn(), rate_limited: &dyn Fn()) -> bool {
        let now = Instant::now();

        let present = self
            .entries
            .get(&key)
            .is_some_and(|inserted_at| self.is_fresh(*inserted_at, now));
        if present {
            cache_hit();
            return false;
        }

        if !self.limiter.try_acquire() {
            rate_limited();
            return false;
        }

        let admission = self.admission.lock();
        let existing = self.entries.get(&key).map(|inserted_at| *inserted_at);
        match existing {
            Some(inserted_at) if self.is_fresh(inserted_at, now) => {
                drop(admission);
                cache_hit();
                false
            }
            Some(_) => {
                self.entries.insert(key, now);
                true
            }
            None => {
                self.make_room(now);
                self.reserved.fetch_add(1, Ordering::AcqRel);
                self.entries.insert(key, now);
                true
            }
        }
    }

    fn size(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc, Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    fn options(permits_per_second: f64, max_entries: usize, ttl: Duration) -> RateLimitedCacheOptions {
        RateLimitedCacheOptions {
            permits_per_second,
            max_entries,
            ttl,
        }
    }

    #[test]
    fn second_acquire_is_a_hit() {
        let cache = DefaultRateLimitedCache::new(RateLimitedCacheOptions::default());
        let hits = AtomicUsize::new(0);
        let limited = AtomicUsize::new(0);
        let on_hit = || {
            hits.fetch_add(1, Ordering::SeqCst);
        };
        let on_limited = || {
            limited.fetch_add(1, Ordering::SeqCst);
        };

        assert!(cache.acquire("cpu{host=a}", &on_hit, &on_limited));
        assert!(!cache.acquire("cpu{host=a}", &on_hit, &on_limited));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(limited.load(Ordering::SeqCst), 0);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn empty_bucket_rate_limits_new_keys() {
        let cache = DefaultRateLimitedCache::new(options(2.0, 100, Duration::from_secs(60)));
        let limited = AtomicUsize::new(0);
        let on_limited = || {
            limited.fetch_add(1, Ordering::SeqCst);
        };

        assert!(cache.acquire(1u32, &|| {}, &on_limited));
        assert!(cache.acquire(2u32, &|| {}, &on_limited));
        assert!(!cache.acquire(3u32, &|| {}, &on_limited));
        assert_eq!(limited.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn expired_entries_are_acquired_again() {
        let cache = DefaultRateLimitedCache::new(options(1_000.0, 100, Duration::from_millis(20)));
        assert!(cache.acquire("k", &|| {}, &|| {}));
        thread::sleep(Duration::from_millis(40));
        assert!(cache.acquire("k", &|| {}, &|| {}));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = DefaultRateLimitedCache::new(options(1_000.0, 2, Duration::from_secs(60)));
        assert!(cache.acquire("a", &|| {}, &|| {}));
        thread::sleep(Duration::from_millis(2));
        assert!(cache.acquire("b", &|| {}, &|| {}));
        thread::sleep(Duration::from_millis(2));
        assert!(cache.acquire("c", &|| {}, &|| {}));

        assert_eq!(cache.size(), 2);
        assert!(cache.acquire("a", &|| {}, &|| {}));
    }

    #[test]
    fn exactly_one_first_under_contention() {
        const THREADS: usize = 16;
        let cache = Arc::new(DefaultRateLimitedCache::new(options(
            4.0,
            100,
            Duration::from_secs(60),
        )));
        let barrier = Arc::new(Barrier::new(THREADS));
        let firsts = Arc::new(AtomicUsize::new(0));
        let callbacks = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let firsts = Arc::clone(&firsts);
                let callbacks = Arc::clone(&callbacks);
                thread::spawn(move || {
                    let bump = || {
                        callbacks.fetch_add(1, Ordering::SeqCst);
                    };
                    barrier.wait();
                    if cache.acquire("hot-key".to_owned(), &bump, &bump) {
                        firsts.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }

        assert_eq!(firsts.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.load(Ordering::SeqCst), THREADS - 1);
        assert_eq!(cache.size(), 1);
    }
}
