use crate::config::Config;
use crate::credential::ApiKey;
use crate::logging;
use crate::orchestrator::WorkError;
use reqwest::header::{ACCEPT_ENCODING, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use thiserror::Error;

/// 音乐分类（YouTube videoCategoryId）。
const MUSIC_CATEGORY_ID: &str = "10";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("YouTube API 错误 {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Google 错误体 `error.errors[0].reason`，如 quotaExceeded / keyInvalid。
        reason: Option<String>,
    },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Http { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

/// reqwest 错误的 Display 带完整请求 URL（含 `key=`），转换前先去掉。
fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.without_url())
}

impl From<ApiError> for WorkError {
    /// 401/403/429 以及 keyInvalid 类原因视为密钥问题（换密钥）；400 视为请求错误（中止）；
    /// 其余（5xx、网络、解析）视为临时错误。
    fn from(err: ApiError) -> Self {
        let message = match err.reason() {
            Some(reason) => format!("{reason}: {err}"),
            None => err.to_string(),
        };
        let message = logging::redact_query_key(&message).into_owned();

        let key_problem = matches!(
            err.reason(),
            Some("keyInvalid" | "keyExpired" | "ipRefererBlocked" | "accessNotConfigured")
        );

        match err.status() {
            Some(401 | 403 | 429) => WorkError::QuotaOrAuthRejected(message),
            Some(400) if key_problem => WorkError::QuotaOrAuthRejected(message),
            Some(400) => WorkError::MalformedRequest(message),
            _ => WorkError::Transient(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YouTubeClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    log_level: logging::LogLevel,
}

impl YouTubeClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if cfg.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.timeout_ms));
        }

        // 只认 PROXY 配置，不读取系统代理环境变量。
        builder = if cfg.proxy.trim().is_empty() {
            builder.no_proxy()
        } else {
            builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?)
        };

        Ok(Self {
            http: builder.build()?,
            base_url: cfg.upstream_base_url.trim_end_matches('/').to_string(),
            user_agent: cfg.api_user_agent.clone(),
            log_level: cfg.log_level(),
        })
    }

    fn build_headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent).unwrap_or(HeaderValue::from_static("ytquota")),
        );
        h.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        h
    }

    /// 音乐视频搜索（search.list，100 单位）。
    pub async fn search(
        &self,
        key: &ApiKey,
        query: &str,
        limit: u32,
    ) -> Result<sonic_rs::Value, ApiError> {
        let params = [
            ("part", "snippet".to_string()),
            ("q", music_query(query)),
            ("maxResults", limit.to_string()),
            ("type", "video".to_string()),
            ("videoCategoryId", MUSIC_CATEGORY_ID.to_string()),
            ("videoEmbeddable", "true".to_string()),
        ];
        self.get_json(key, "search", &params).await
    }

    /// 视频详情（videos.list，1 单位）。
    pub async fn video(&self, key: &ApiKey, video_id: &str) -> Result<sonic_rs::Value, ApiError> {
        let params = [
            ("part", "snippet,contentDetails".to_string()),
            ("id", video_id.to_string()),
        ];
        self.get_json(key, "videos", &params).await
    }

    /// 相关视频（search.list + relatedToVideoId，100 单位）。
    pub async fn related(
        &self,
        key: &ApiKey,
        video_id: &str,
        limit: u32,
    ) -> Result<sonic_rs::Value, ApiError> {
        let params = [
            ("part", "snippet".to_string()),
            ("relatedToVideoId", video_id.to_string()),
            ("maxResults", limit.to_string()),
            ("type", "video".to_string()),
            ("videoCategoryId", MUSIC_CATEGORY_ID.to_string()),
        ];
        self.get_json(key, "search", &params).await
    }

    async fn get_json(
        &self,
        key: &ApiKey,
        resource: &str,
        params: &[(&str, String)],
    ) -> Result<sonic_rs::Value, ApiError> {
        let url = format!("{}/{resource}", self.base_url);
        let req = self
            .http
            .get(url)
            .headers(self.build_headers())
            .query(params)
            .query(&[("key", key.expose())])
            .build()
            .map_err(transport)?;

        if self.log_level.backend_enabled() {
            logging::backend_request("GET", req.url().as_str());
        }

        let start = std::time::Instant::now();
        let resp = self.http.execute(req).await.map_err(transport)?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(transport)?;

        if self.log_level.backend_enabled() {
            logging::backend_response(
                status.as_u16(),
                start.elapsed(),
                &bytes,
                self.log_level.raw_enabled(),
            );
        }

        if !status.is_success() {
            return Err(extract_error_details(status.as_u16(), &bytes));
        }
        Ok(sonic_rs::from_slice::<sonic_rs::Value>(&bytes)?)
    }
}

/// 查询里没有音乐相关词时补上 "music"，让结果偏向音乐内容。
fn music_query(query: &str) -> String {
    let lower = query.to_lowercase();
    if ["music", "audio", "canción", "música"]
        .iter()
        .any(|w| lower.contains(w))
    {
        query.to_string()
    } else {
        format!("{query} music")
    }
}

fn extract_error_details(status: u16, body: &[u8]) -> ApiError {
    #[derive(Debug, serde::Deserialize)]
    struct ErrResp {
        error: ErrInner,
    }

    #[derive(Debug, serde::Deserialize)]
    struct ErrInner {
        #[serde(default)]
        message: String,
        #[serde(default)]
        errors: Vec<ErrItem>,
    }

    #[derive(Debug, serde::Deserialize)]
    struct ErrItem {
        #[serde(default)]
        reason: String,
    }

    match sonic_rs::from_slice::<ErrResp>(body) {
        Ok(resp) => {
            let reason = resp
                .error
                .errors
                .into_iter()
                .map(|e| e.reason)
                .find(|r| !r.is_empty());
            let message = if resp.error.message.is_empty() {
                "Unknown error".to_string()
            } else {
                resp.error.message
            };
            ApiError::Http {
                status,
                message,
                reason,
            }
        }
        Err(_) => ApiError::Http {
            status,
            message: String::from_utf8_lossy(body).trim().to_string(),
            reason: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_error_details_reads_google_reason() {
        let body = br#"{
          "error": {
            "code": 403,
            "message": "The request cannot be completed because you have exceeded your quota.",
            "errors": [
              { "message": "exceeded", "domain": "youtube.quota", "reason": "quotaExceeded" }
            ]
          }
        }"#;
        let err = extract_error_details(403, body);
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.reason(), Some("quotaExceeded"));

        let work: WorkError = err.into();
        assert!(matches!(work, WorkError::QuotaOrAuthRejected(_)));
        assert!(work.message().to_lowercase().contains("quota"));
    }

    #[test]
    fn extract_error_details_tolerates_non_json() {
        let err = extract_error_details(502, b"  Bad Gateway ");
        match err {
            ApiError::Http {
                status,
                message,
                reason,
            } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
                assert!(reason.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classification_by_status() {
        let http = |status, reason: Option<&str>| ApiError::Http {
            status,
            message: "m".to_string(),
            reason: reason.map(str::to_string),
        };

        assert!(matches!(
            WorkError::from(http(429, Some("rateLimitExceeded"))),
            WorkError::QuotaOrAuthRejected(_)
        ));
        assert!(matches!(
            WorkError::from(http(401, None)),
            WorkError::QuotaOrAuthRejected(_)
        ));
        assert!(matches!(
            WorkError::from(http(400, Some("invalidParameter"))),
            WorkError::MalformedRequest(_)
        ));
        assert!(matches!(
            WorkError::from(http(400, Some("keyInvalid"))),
            WorkError::QuotaOrAuthRejected(_)
        ));
        assert!(matches!(
            WorkError::from(http(503, None)),
            WorkError::Transient(_)
        ));
    }

    #[test]
    fn invalid_key_message_does_not_mention_quota() {
        let work = WorkError::from(ApiError::Http {
            status: 400,
            message: "API key not valid. Please pass a valid API key.".to_string(),
            reason: Some("keyInvalid".to_string()),
        });
        assert!(!work.message().to_lowercase().contains("quota"));
    }

    #[tokio::test]
    async fn transport_error_does_not_expose_key() {
        let secret = "AIzaSyFULLSECRETKEYVALUE1234";
        let client = YouTubeClient {
            http: reqwest::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap(),
            base_url: "http://127.0.0.1:1".to_string(),
            user_agent: "ytquota-test".to_string(),
            log_level: logging::LogLevel::Off,
        };

        let err = client.video(&ApiKey::new(secret), "abc").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(!err.to_string().contains(secret));

        let work = WorkError::from(err);
        assert!(matches!(work, WorkError::Transient(_)));
        assert!(!work.message().contains(secret));
    }

    #[test]
    fn url_in_error_message_is_masked() {
        let work = WorkError::from(ApiError::Http {
            status: 502,
            message: "bad gateway at http://h/videos?id=abc&key=AIzaSyFULLSECRETKEYVALUE1234"
                .to_string(),
            reason: None,
        });
        assert!(!work.message().contains("AIzaSyFULLSECRETKEYVALUE1234"));
        assert!(work.message().contains("key=AIza..."));
    }

    #[test]
    fn music_query_appends_hint_once() {
        assert_eq!(music_query("daft punk"), "daft punk music");
        assert_eq!(music_query("Daft Punk Audio"), "Daft Punk Audio");
    }
}
