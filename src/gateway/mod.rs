//! HTTP 网关：YouTube 代理路由与状态接口。

pub mod status;
pub mod youtube;

use crate::cache::ResponseCache;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::credential::Ledger;
use crate::orchestrator::Orchestrator;
use crate::quota_pool::{QuotaAllocator, default_policies};
use crate::upstream::YouTubeClient;
use anyhow::Context;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;

pub struct AppState {
    pub cfg: Config,
    pub orchestrator: Orchestrator<sonic_rs::Value>,
    pub client: YouTubeClient,
}

impl AppState {
    /// 按配置组装编排器并注册密钥池。
    pub async fn build(cfg: Config, clock: SharedClock) -> anyhow::Result<Self> {
        let ledger = Arc::new(Ledger::new(cfg.ledger_limits(), clock.clone()));
        let allocator = QuotaAllocator::new(default_policies(), clock.clone());
        let cache = ResponseCache::new(cfg.cache_capacity, clock);
        let orchestrator = Orchestrator::new(ledger, allocator, cache);

        orchestrator
            .register(cfg.api_keys.clone(), cfg.playback_key_index)
            .await
            .context("注册 API 密钥失败")?;

        let client = YouTubeClient::new(&cfg).context("初始化 YouTubeClient 失败")?;

        Ok(Self {
            cfg,
            orchestrator,
            client,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(status::handle_health))
        .route("/api/youtube/search", get(youtube::handle_search))
        .route("/api/youtube/video", get(youtube::handle_video))
        .route("/api/youtube/related", get(youtube::handle_related))
        .route("/manager/api/status", get(status::handle_status))
        .with_state(state)
}
