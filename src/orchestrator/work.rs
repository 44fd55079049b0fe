use crate::quota_pool::PriorityClass;
use std::time::Duration;
use thiserror::Error;

/// 调用方 work 的失败分类，决定编排器是换密钥重试还是立即中止。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    /// 上游判定配额耗尽或密钥无效：禁用该密钥后换下一把。
    #[error("上游拒绝（配额/鉴权）: {0}")]
    QuotaOrAuthRejected(String),

    /// 请求本身有误：换密钥也无济于事，直接返回给调用方。
    #[error("请求格式错误: {0}")]
    MalformedRequest(String),

    #[error("临时错误: {0}")]
    Transient(String),
}

impl WorkError {
    pub fn message(&self) -> &str {
        match self {
            Self::QuotaOrAuthRejected(m) | Self::MalformedRequest(m) | Self::Transient(m) => m,
        }
    }
}

/// 一次 execute 调用的参数。`cache_key` 必须编码所有影响结果的参数。
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub class: PriorityClass,
    pub operation: String,
    pub cache_key: String,
    pub reserved: bool,
    /// `None` 表示结果不写入缓存。
    pub cache_ttl: Option<Duration>,
}

impl ExecuteRequest {
    pub fn new(
        class: PriorityClass,
        operation: impl Into<String>,
        cache_key: impl Into<String>,
    ) -> Self {
        Self {
            class,
            operation: operation.into(),
            cache_key: cache_key.into(),
            reserved: false,
            cache_ttl: None,
        }
    }

    pub fn reserved(mut self, reserved: bool) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}
