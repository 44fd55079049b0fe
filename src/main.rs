pub mod cache;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod orchestrator;
pub mod quota_pool;
pub mod upstream;
pub mod util;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing();

    if cfg.api_keys.is_empty() {
        tracing::warn!("未配置任何 YOUTUBE_API_KEY，所有代理请求都将返回 503");
    } else {
        tracing::info!(
            "加载 {} 个 API 密钥，每把每日上限 {}",
            cfg.api_keys.len(),
            cfg.daily_quota_limit
        );
    }

    let state = gateway::AppState::build(cfg.clone(), clock::system()).await?;

    // 后台清理过期缓存，仅控制内存；过期判定在读取时完成。
    cache::spawn_sweep_task(state.orchestrator.cache().clone(), cfg.cache_sweep_interval);

    let app = gateway::router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

fn init_tracing() {
    // 依赖库日志默认控制在 warn，本项目自身日志至少为 info；
    // 已设置的 RUST_LOG 优先，但未提及本 crate 时补上 ytquota=info。
    // DEBUG 只控制请求/响应日志块，不影响这里的过滤。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,ytquota=info")
    } else if env.contains("ytquota") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},ytquota=info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}
