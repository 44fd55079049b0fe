use crate::clock::SharedClock;
use crate::credential::selector;
use crate::credential::types::{
    ApiKey, Credential, CredentialStatus, DisableReason, FailureRecord, LedgerStatus, Purpose,
};
use crate::error::QuotaError;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashSet;
use tokio::sync::RwLock;

pub const DEFAULT_DAILY_CAP: u64 = 10_000;
pub const DEFAULT_WARNING_RATIO: f64 = 0.8;

pub fn window_length() -> TimeDelta {
    TimeDelta::days(1)
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerLimits {
    pub daily_cap: u64,
    pub warning_ratio: f64,
}

impl LedgerLimits {
    fn warning_threshold(&self) -> u64 {
        let ratio = if self.warning_ratio.is_finite() {
            self.warning_ratio.clamp(0.0, 1.0)
        } else {
            DEFAULT_WARNING_RATIO
        };
        (self.daily_cap as f64 * ratio) as u64
    }
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            daily_cap: DEFAULT_DAILY_CAP,
            warning_ratio: DEFAULT_WARNING_RATIO,
        }
    }
}

/// 凭证账本：维护凭证池及每把密钥在当前 24 小时窗口内的消耗。
#[derive(Debug)]
pub struct Ledger {
    limits: LedgerLimits,
    clock: SharedClock,
    state: RwLock<State>,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) registered: bool,
    pub(crate) credentials: Vec<Credential>,
    pub(crate) reserved_index: Option<usize>,
    /// 下一次通用轮询的起点（上次返回位置之后）。
    pub(crate) next_index: usize,
}

impl Ledger {
    pub fn new(limits: LedgerLimits, clock: SharedClock) -> Self {
        Self {
            limits,
            clock,
            state: RwLock::new(State::default()),
        }
    }

    /// 初始化凭证池；只允许调用一次。
    ///
    /// - 空列表：进入“空池”状态，后续请求会得到 pool exhausted
    /// - 未指定预留索引且多于一把密钥：最后一把自动预留给播放
    /// - 重复密钥只保留第一次出现
    pub async fn register(
        &self,
        keys: Vec<ApiKey>,
        reserved_index: Option<usize>,
    ) -> Result<(), QuotaError> {
        let mut state = self.state.write().await;
        if state.registered {
            return Err(QuotaError::AlreadyRegistered);
        }

        let mut seen = HashSet::new();
        let keys: Vec<ApiKey> = keys
            .into_iter()
            .filter(|k| !k.expose().trim().is_empty())
            .filter(|k| seen.insert(k.clone()))
            .collect();

        state.registered = true;
        state.next_index = 0;
        if keys.is_empty() {
            tracing::warn!("凭证池为空：未配置任何可用的 API 密钥");
            state.credentials.clear();
            state.reserved_index = None;
            return Ok(());
        }

        let reserved = match reserved_index {
            Some(i) if i < keys.len() && keys.len() > 1 => Some(i),
            Some(i) if keys.len() == 1 => {
                tracing::warn!("仅有 1 把密钥，忽略预留索引 {i}，该密钥用于全部请求");
                None
            }
            Some(i) => {
                tracing::warn!("预留索引 {i} 超出范围（共 {} 把），改用最后一把", keys.len());
                Some(keys.len() - 1)
            }
            None if keys.len() > 1 => Some(keys.len() - 1),
            None => None,
        };

        let now = self.clock.now();
        state.credentials = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| {
                let purpose = if Some(i) == reserved {
                    Purpose::Playback
                } else {
                    Purpose::General
                };
                Credential::new(key, purpose, now)
            })
            .collect();
        state.reserved_index = reserved;

        if let Some(i) = reserved {
            tracing::info!("第 {} 把密钥预留给播放请求", i + 1);
        }
        tracing::info!("凭证池初始化完成：共 {} 把密钥", state.credentials.len());
        Ok(())
    }

    pub async fn is_registered(&self) -> bool {
        self.state.read().await.registered
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.credentials.len()
    }

    /// 池的理论总容量（凭证数 × 每日上限）。
    pub async fn total_capacity(&self) -> u64 {
        let n = self.len().await as u64;
        n.saturating_mul(self.limits.daily_cap)
    }

    /// 为一次尝试挑选凭证，跳过 exclude；`None` 表示没有可用凭证。
    pub async fn pick(
        &self,
        for_reserved: bool,
        exclude: &HashSet<ApiKey>,
    ) -> Result<Option<ApiKey>, QuotaError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if !state.registered {
            return Err(QuotaError::NotInitialized);
        }
        roll_windows(&mut state, now);
        Ok(selector::pick(&mut state, for_reserved, exclude))
    }

    /// 记录一次成功调用的消耗；达到上限即禁用。
    pub async fn record_usage(&self, key: &ApiKey, cost: u64) {
        let now = self.clock.now();
        let cap = self.limits.daily_cap;
        let warn_at = self.limits.warning_threshold();

        let mut state = self.state.write().await;
        let Some(c) = state.credentials.iter_mut().find(|c| c.key == *key) else {
            tracing::debug!(key = %key, "记录消耗时未找到凭证");
            return;
        };

        roll_window(c, now);

        let before = c.consumed;
        c.consumed = c.consumed.saturating_add(cost);

        if c.consumed >= cap {
            if c.enabled {
                c.enabled = false;
                c.disabled_by = Some(DisableReason::QuotaExhausted);
                c.last_error = Some(FailureRecord {
                    at: now,
                    message: format!("quota exhausted ({}/{cap})", c.consumed),
                });
                tracing::warn!("密钥 {} 已用尽每日配额（{}/{cap}）", c.key, c.consumed);
                if c.purpose == Purpose::Playback {
                    tracing::error!("播放专用密钥配额已耗尽，播放请求将退化到通用密钥");
                }
            }
        } else if before < warn_at && c.consumed >= warn_at {
            tracing::warn!("密钥 {} 接近每日配额上限（{}/{cap}）", c.key, c.consumed);
        }
    }

    /// 立即禁用凭证（上游的配额/鉴权拒绝优先于本地记账）。
    ///
    /// 返回本次是否由启用变为禁用；已禁用的凭证只刷新失败记录，不重复告警。
    pub async fn disable(&self, key: &ApiKey, reason: &str) -> bool {
        let quota_related = reason.to_lowercase().contains("quota");
        self.disable_with(key, reason, DisableReason::Upstream { quota_related })
            .await
    }

    async fn disable_with(&self, key: &ApiKey, reason: &str, by: DisableReason) -> bool {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let Some(c) = state.credentials.iter_mut().find(|c| c.key == *key) else {
            return false;
        };
        let was_enabled = c.enabled;
        c.enabled = false;
        c.disabled_by = Some(by);
        c.last_error = Some(FailureRecord {
            at: now,
            message: reason.to_string(),
        });
        if was_enabled {
            tracing::warn!("密钥 {} 被上游拒绝，已禁用：{reason}", c.key);
            if c.purpose == Purpose::Playback {
                tracing::warn!("播放专用密钥不可用，播放请求将退化为通用轮询");
            }
        }
        was_enabled
    }

    pub async fn status(&self) -> LedgerStatus {
        let now = self.clock.now();
        let cap = self.limits.daily_cap;
        let mut state = self.state.write().await;
        roll_windows(&mut state, now);

        let reserved_index = state.reserved_index;
        let credentials: Vec<CredentialStatus> = state
            .credentials
            .iter()
            .enumerate()
            .map(|(i, c)| CredentialStatus {
                key: c.key.masked(),
                purpose: c.purpose,
                is_reserved: Some(i) == reserved_index,
                consumed: c.consumed,
                daily_cap: cap,
                enabled: c.enabled,
                window_started_at: c.window_start,
                last_error: c.last_error.clone(),
            })
            .collect();
        let enabled = credentials.iter().filter(|c| c.enabled).count();

        LedgerStatus {
            total: credentials.len(),
            enabled,
            disabled: credentials.len() - enabled,
            reserved_index,
            credentials,
        }
    }
}

fn roll_windows(state: &mut State, now: DateTime<Utc>) {
    for c in &mut state.credentials {
        roll_window(c, now);
    }
}

/// 距窗口起点满 24 小时：消耗清零；因配额禁用的凭证恢复启用。
fn roll_window(c: &mut Credential, now: DateTime<Utc>) {
    if now - c.window_start < window_length() {
        return;
    }
    c.consumed = 0;
    c.window_start = now;
    if !c.enabled && c.recovers_on_reset() {
        c.enabled = true;
        c.disabled_by = None;
        c.last_error = None;
        tracing::info!("密钥 {} 配额窗口已重置，重新启用", c.key);
    }
}
