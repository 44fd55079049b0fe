use crate::cache::ResponseCache;
use crate::credential::{ApiKey, Ledger, LedgerStatus};
use crate::error::QuotaError;
use crate::orchestrator::work::{ExecuteRequest, WorkError};
use crate::quota_pool::{AllocatorStatus, QuotaAllocator};
use crate::util::id;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// 对外入口：缓存 → 分类配额 → 选密钥 → 执行 → 记账，失败时按分类决定换密钥或中止。
///
/// 账本/分配器的修改只发生在 work 之前（authorize）与之后（charge/record_usage），
/// work 执行期间不持有任何锁。
#[derive(Debug, Clone)]
pub struct Orchestrator<V>
where
    V: Clone + Send + Sync + 'static,
{
    ledger: Arc<Ledger>,
    allocator: QuotaAllocator,
    cache: ResponseCache<V>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub credentials: LedgerStatus,
    pub classes: AllocatorStatus,
    pub cached_entries: u64,
}

impl<V> Orchestrator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ledger: Arc<Ledger>, allocator: QuotaAllocator, cache: ResponseCache<V>) -> Self {
        Self {
            ledger,
            allocator,
            cache,
        }
    }

    /// 注册凭证池（进程启动时调用一次），并据此更新分类上限的容量基数。
    pub async fn register(
        &self,
        keys: Vec<ApiKey>,
        reserved_index: Option<usize>,
    ) -> Result<(), QuotaError> {
        self.ledger.register(keys, reserved_index).await?;
        self.allocator
            .set_pool_capacity(self.ledger.total_capacity().await);
        Ok(())
    }

    pub fn cache(&self) -> &ResponseCache<V> {
        &self.cache
    }

    /// 执行一次上游调用。
    ///
    /// 重试顺序执行、最多尝试凭证数次；丢弃返回的 future 即取消，后续不再重试，预占自动释放。
    pub async fn execute<F, Fut>(&self, req: &ExecuteRequest, work: F) -> Result<V, QuotaError>
    where
        F: FnMut(ApiKey) -> Fut,
        Fut: Future<Output = Result<V, WorkError>>,
    {
        let span = tracing::debug_span!(
            "execute",
            request_id = %id::request_id(),
            class = %req.class,
            operation = %req.operation,
        );
        self.execute_inner(req, work).instrument(span).await
    }

    async fn execute_inner<F, Fut>(&self, req: &ExecuteRequest, mut work: F) -> Result<V, QuotaError>
    where
        F: FnMut(ApiKey) -> Fut,
        Fut: Future<Output = Result<V, WorkError>>,
    {
        if !self.ledger.is_registered().await {
            return Err(QuotaError::NotInitialized);
        }

        if let Some(hit) = self.cache.get(&req.cache_key).await {
            tracing::debug!("缓存命中：{}", req.cache_key);
            return Ok(hit);
        }

        let ticket = self.allocator.authorize(req.class, &req.operation)?;

        let max_attempts = self.ledger.len().await;
        let mut tried: HashSet<ApiKey> = HashSet::new();
        let mut last_error: Option<WorkError> = None;

        for attempt in 1..=max_attempts {
            let Some(key) = self.ledger.pick(req.reserved, &tried).await? else {
                break;
            };

            match work(key.clone()).await {
                Ok(value) => {
                    self.ledger.record_usage(&key, ticket.cost()).await;
                    self.allocator.charge(ticket);
                    if let Some(ttl) = req.cache_ttl {
                        self.cache.put(req.cache_key.clone(), value.clone(), ttl).await;
                    }
                    return Ok(value);
                }
                Err(WorkError::MalformedRequest(message)) => {
                    tracing::error!("请求参数错误（密钥 {key}）：{message}");
                    return Err(QuotaError::MalformedRequest {
                        class: req.class,
                        operation: req.operation.clone(),
                        credential: key.masked(),
                        message,
                    });
                }
                Err(e @ WorkError::QuotaOrAuthRejected(_)) => {
                    self.ledger.disable(&key, e.message()).await;
                    last_error = Some(e);
                }
                Err(e @ WorkError::Transient(_)) => {
                    tracing::warn!("密钥 {key} 第 {attempt} 次尝试失败：{}", e.message());
                    last_error = Some(e);
                }
            }
            tried.insert(key);
        }

        match last_error {
            Some(e) => Err(QuotaError::AllCredentialsFailed {
                class: req.class,
                operation: req.operation.clone(),
                attempts: tried.len(),
                last_error: e.to_string(),
            }),
            None => Err(QuotaError::PoolExhausted {
                class: req.class,
                operation: req.operation.clone(),
            }),
        }
    }

    pub async fn status(&self) -> PoolStatus {
        PoolStatus {
            credentials: self.ledger.status().await,
            classes: self.allocator.status(),
            cached_entries: self.cache.len().await,
        }
    }
}
