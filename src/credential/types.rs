use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// 上游 API 凭证（密钥原文）。Debug/Display 只输出掩码，原文需显式 `expose()`。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask_key(&self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.masked()).finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// 仅保留首尾各 4 个字符；过短的密钥整体隐藏。
pub fn mask_key(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Playback,
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// 禁用原因：决定窗口重置时能否自动恢复。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableReason {
    /// 本地记账达到每日上限。
    QuotaExhausted,
    /// 上游返回配额/鉴权类拒绝。
    Upstream { quota_related: bool },
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub key: ApiKey,
    pub consumed: u64,
    pub window_start: DateTime<Utc>,
    pub enabled: bool,
    pub purpose: Purpose,
    pub disabled_by: Option<DisableReason>,
    pub last_error: Option<FailureRecord>,
}

impl Credential {
    pub fn new(key: ApiKey, purpose: Purpose, now: DateTime<Utc>) -> Self {
        Self {
            key,
            consumed: 0,
            window_start: now,
            enabled: true,
            purpose,
            disabled_by: None,
            last_error: None,
        }
    }

    /// 窗口重置后是否应自动恢复启用。
    pub fn recovers_on_reset(&self) -> bool {
        matches!(
            self.disabled_by,
            Some(DisableReason::QuotaExhausted)
                | Some(DisableReason::Upstream {
                    quota_related: true
                })
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub key: String,
    pub purpose: Purpose,
    pub is_reserved: bool,
    pub consumed: u64,
    pub daily_cap: u64,
    pub enabled: bool,
    pub window_started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FailureRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatus {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_index: Option<usize>,
    pub credentials: Vec<CredentialStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_key_keeps_only_head_and_tail() {
        assert_eq!(mask_key("AIzaSyAbcdefghijklmn1234"), "AIza...1234");
        assert_eq!(mask_key("12345678"), "****");
        assert_eq!(mask_key(""), "****");
    }

    #[test]
    fn api_key_formatting_never_leaks_secret() {
        let k = ApiKey::new("AIzaSySECRETSECRETSECRETwxyz");
        assert_eq!(format!("{k}"), "AIza...wxyz");
        assert!(!format!("{k:?}").contains("SECRET"));
        assert_eq!(k.expose(), "AIzaSySECRETSECRETSECRETwxyz");
    }
}
