use crate::cache::store::ResponseCache;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// 启动后台清理任务：周期性移除过期条目，仅用于控制内存。
pub fn spawn_sweep_task<V>(cache: ResponseCache<V>, every: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut tick = interval(every);
        // 第一次 tick 立即返回，跳过。
        tick.tick().await;
        loop {
            tick.tick().await;
            let removed = cache.sweep().await;
            if removed > 0 {
                tracing::info!("缓存清理：移除 {removed} 个过期条目");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use chrono::TimeDelta;

    #[tokio::test(start_paused = true)]
    async fn sweep_task_purges_on_interval() {
        let clock = ManualClock::new();
        let shared: SharedClock = clock.clone();
        let cache: ResponseCache<u32> = ResponseCache::new(10, shared);
        cache.put("k", 1, Duration::from_secs(5)).await;
        clock.advance(TimeDelta::seconds(10));

        let handle = spawn_sweep_task(cache.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(cache.len().await, 0);
        handle.abort();
    }
}
