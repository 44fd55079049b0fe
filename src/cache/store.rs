use crate::clock::SharedClock;
use chrono::{DateTime, TimeDelta, Utc};
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_CAPACITY: u64 = 50_000;

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    payload: V,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        now - self.created_at < ttl
    }
}

/// 让 moka 按条目自身 TTL 淘汰，只用于约束内存；有效性以 `get` 时的检查为准。
struct EntryExpiry;

impl<V> Expiry<String, CacheEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// 上游响应缓存：命中不消耗任何配额。
#[derive(Clone, Debug)]
pub struct ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    entries: Cache<String, CacheEntry<V>>,
    clock: SharedClock,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: u64, clock: SharedClock) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { entries, clock }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key).await?;
        let now = self.clock.now();
        if entry.is_valid(now) {
            return Some(entry.payload);
        }
        match self.evict_if_stale(key, now).await {
            CompResult::Unchanged(fresh) => Some(fresh.into_value().payload),
            _ => None,
        }
    }

    /// 在该 key 上原子地复查：仍过期才移除，期间被 `put` 覆盖的新条目保持不动。
    async fn evict_if_stale(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> CompResult<String, CacheEntry<V>> {
        self.entries
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(e) if !e.value().is_valid(now) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await
    }

    /// 写入/覆盖条目；ttl 为 0 的条目永远无效，直接忽略。
    pub async fn put(&self, key: impl Into<String>, payload: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = CacheEntry {
            payload,
            created_at: self.clock.now(),
            ttl,
        };
        self.entries.insert(key.into(), entry).await;
    }

    /// 清除所有已过期条目，返回清除数量。
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_valid(now))
            .map(|(k, _)| k)
            .collect();

        let mut removed = 0;
        for k in &expired {
            if let CompResult::Removed(_) = self.evict_if_stale(k.as_str(), now).await {
                removed += 1;
            }
        }
        self.entries.run_pending_tasks().await;
        removed
    }

    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}
