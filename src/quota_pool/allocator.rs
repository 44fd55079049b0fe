use crate::clock::SharedClock;
use crate::credential::ledger::window_length;
use crate::error::QuotaError;
use crate::quota_pool::types::{
    AllocatorStatus, ClassPolicy, ClassStatus, PriorityClass, default_policies,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// 分类配额分配器：在单把凭证上限之外，再按调用意图做一层独立限流。
///
/// `authorize` 只预占（pending），真正扣减在上游调用成功后通过 `charge` 完成；
/// ticket 未提交即被丢弃（失败/取消）时预占自动释放。
#[derive(Debug, Clone)]
pub struct QuotaAllocator {
    clock: SharedClock,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    window_start: DateTime<Utc>,
    pool_capacity: u64,
    classes: HashMap<PriorityClass, ClassState>,
}

#[derive(Debug)]
struct ClassState {
    policy: ClassPolicy,
    consumed: u64,
    pending: u64,
}

impl QuotaAllocator {
    /// 未提供策略的分类使用默认策略。
    pub fn new(mut policies: HashMap<PriorityClass, ClassPolicy>, clock: SharedClock) -> Self {
        let mut defaults = default_policies();
        let classes = PriorityClass::ALL
            .into_iter()
            .filter_map(|class| {
                let policy = policies
                    .remove(&class)
                    .or_else(|| defaults.remove(&class))?;
                Some((
                    class,
                    ClassState {
                        policy,
                        consumed: 0,
                        pending: 0,
                    },
                ))
            })
            .collect();

        let window_start = clock.now();
        Self {
            clock,
            inner: Arc::new(Mutex::new(Inner {
                window_start,
                pool_capacity: 0,
                classes,
            })),
        }
    }

    /// 更新池容量（凭证数 × 每日上限），用于按比例推导上限。
    pub fn set_pool_capacity(&self, capacity: u64) {
        self.inner.lock().pool_capacity = capacity;
    }

    /// 检查分类余量并预占本次成本。
    pub fn authorize(
        &self,
        class: PriorityClass,
        operation: &str,
    ) -> Result<QuotaTicket, QuotaError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.roll_window(now);

        let capacity = inner.pool_capacity;
        let Some(state) = inner.classes.get_mut(&class) else {
            return Err(QuotaError::ClassQuotaExceeded {
                class,
                operation: operation.to_string(),
                consumed: 0,
                cost: 0,
                ceiling: 0,
            });
        };

        let cost = state.policy.cost_of(operation);
        let ceiling = state.policy.effective_ceiling(capacity);
        let committed = state.consumed.saturating_add(state.pending);
        if ceiling == 0 || committed.saturating_add(cost) > ceiling {
            tracing::warn!(
                "分类 {class} 配额不足：操作 {operation} 需 {cost}，已用 {}/{ceiling}",
                committed
            );
            return Err(QuotaError::ClassQuotaExceeded {
                class,
                operation: operation.to_string(),
                consumed: committed,
                cost,
                ceiling,
            });
        }

        state.pending += cost;
        Ok(QuotaTicket {
            inner: self.inner.clone(),
            class,
            cost,
            settled: false,
        })
    }

    /// 上游成功：ticket 的预占转为正式消耗，二者在同一把锁内完成。
    pub fn charge(&self, mut ticket: QuotaTicket) {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            inner.roll_window(now);
            let capacity = inner.pool_capacity;
            if let Some(state) = inner.classes.get_mut(&ticket.class) {
                state.pending = state.pending.saturating_sub(ticket.cost);
                state.consumed = state.consumed.saturating_add(ticket.cost);
                tracing::debug!(
                    "分类 {} 当前消耗 {}/{}",
                    ticket.class,
                    state.consumed,
                    state.policy.effective_ceiling(capacity)
                );
            }
        }
        ticket.settled = true;
    }

    pub fn status(&self) -> AllocatorStatus {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.roll_window(now);
        let capacity = inner.pool_capacity;
        let classes = PriorityClass::ALL
            .into_iter()
            .filter_map(|class| {
                let s = inner.classes.get(&class)?;
                Some(ClassStatus {
                    class,
                    reserved_fraction: s.policy.reserved_fraction,
                    consumed: s.consumed,
                    pending: s.pending,
                    ceiling: s.policy.effective_ceiling(capacity),
                })
            })
            .collect();
        AllocatorStatus {
            window_started_at: inner.window_start,
            classes,
        }
    }
}

impl Inner {
    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now - self.window_start < window_length() {
            return;
        }

        let capacity = self.pool_capacity;
        let summary = PriorityClass::ALL
            .into_iter()
            .filter_map(|class| {
                let s = self.classes.get(&class)?;
                Some(format!(
                    "{class}={}/{}",
                    s.consumed,
                    s.policy.effective_ceiling(capacity)
                ))
            })
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!("分类配额窗口重置，上一窗口消耗：{summary}");

        for s in self.classes.values_mut() {
            s.consumed = 0;
        }
        self.window_start = now;
    }
}

/// 一次授权的预占凭据。
#[derive(Debug)]
#[must_use = "未 charge 的 ticket 在 drop 时会释放预占"]
pub struct QuotaTicket {
    inner: Arc<Mutex<Inner>>,
    class: PriorityClass,
    cost: u64,
    settled: bool,
}

impl QuotaTicket {
    pub fn cost(&self) -> u64 {
        self.cost
    }

}

impl Drop for QuotaTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(s) = inner.classes.get_mut(&self.class) {
            s.pending = s.pending.saturating_sub(self.cost);
        }
    }
}
