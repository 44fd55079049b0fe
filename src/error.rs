use crate::quota_pool::PriorityClass;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 配额编排层的错误分类：资源耗尽、策略限流、调用方错误需可区分。
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("凭证池尚未初始化")]
    NotInitialized,

    #[error("凭证池已初始化，不能重复注册")]
    AlreadyRegistered,

    #[error("没有可用的 API 密钥（分类 {class}，操作 {operation}）")]
    PoolExhausted {
        class: PriorityClass,
        operation: String,
    },

    #[error("分类 {class} 今日配额已用尽（操作 {operation} 需 {cost}，已用 {consumed}/{ceiling}）")]
    ClassQuotaExceeded {
        class: PriorityClass,
        operation: String,
        consumed: u64,
        cost: u64,
        ceiling: u64,
    },

    #[error("请求参数错误（分类 {class}，操作 {operation}，密钥 {credential}）: {message}")]
    MalformedRequest {
        class: PriorityClass,
        operation: String,
        credential: String,
        message: String,
    },

    #[error("所有密钥均请求失败（分类 {class}，操作 {operation}，尝试 {attempts} 次）: {last_error}")]
    AllCredentialsFailed {
        class: PriorityClass,
        operation: String,
        attempts: usize,
        last_error: String,
    },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("参数错误: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Quota(#[from] QuotaError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorBodyInner,
}

#[derive(Debug, Serialize)]
struct ErrorBodyInner {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_and_type().0
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Quota(q) => match q {
                QuotaError::ClassQuotaExceeded { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "class_quota_exceeded")
                }
                QuotaError::PoolExhausted { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "pool_exhausted")
                }
                QuotaError::NotInitialized => {
                    (StatusCode::SERVICE_UNAVAILABLE, "pool_not_initialized")
                }
                QuotaError::AlreadyRegistered => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "already_registered")
                }
                QuotaError::MalformedRequest { .. } => {
                    (StatusCode::BAD_REQUEST, "malformed_request")
                }
                QuotaError::AllCredentialsFailed { .. } => {
                    (StatusCode::BAD_GATEWAY, "upstream_failed")
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, ty) = self.status_and_type();
        let body = ErrorBody {
            error: ErrorBodyInner {
                message: self.to_string(),
                r#type: Some(ty.to_string()),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_map_to_distinct_statuses() {
        let class_err = AppError::from(QuotaError::ClassQuotaExceeded {
            class: PriorityClass::Search,
            operation: "search".to_string(),
            consumed: 1500,
            cost: 100,
            ceiling: 1500,
        });
        let pool_err = AppError::from(QuotaError::PoolExhausted {
            class: PriorityClass::Search,
            operation: "search".to_string(),
        });
        let bad = AppError::from(QuotaError::MalformedRequest {
            class: PriorityClass::Search,
            operation: "search".to_string(),
            credential: "AIza...1234".to_string(),
            message: "invalid part".to_string(),
        });

        assert_eq!(
            class_err.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            pool_err.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_messages_carry_context() {
        let e = QuotaError::ClassQuotaExceeded {
            class: PriorityClass::Recommendations,
            operation: "related".to_string(),
            consumed: 500,
            cost: 50,
            ceiling: 500,
        };
        let msg = e.to_string();
        assert!(msg.contains("recommendations"));
        assert!(msg.contains("related"));
        assert!(msg.contains("500/500"));
    }
}
