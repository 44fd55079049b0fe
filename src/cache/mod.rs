//! 带 TTL 的上游响应缓存与后台清理任务。

pub mod store;
pub mod sweeper;

pub use store::{DEFAULT_CACHE_CAPACITY, ResponseCache};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, spawn_sweep_task};
