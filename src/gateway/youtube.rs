use super::AppState;
use crate::error::AppError;
use crate::logging;
use crate::orchestrator::{ExecuteRequest, WorkError};
use crate::quota_pool::PriorityClass;
use axum::Json;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{HeaderMap, Method};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_SEARCH_LIMIT: u32 = 10;
const DEFAULT_RELATED_LIMIT: u32 = 10;
/// YouTube Data API 的 maxResults 上限。
const MAX_LIMIT: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoQuery {
    #[serde(default)]
    id: String,
    /// 播放路径：走播放分类与预留密钥。
    #[serde(default)]
    playback: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelatedQuery {
    #[serde(default)]
    id: String,
    limit: Option<u32>,
}

/// GET /api/youtube/search?q=&limit=
pub async fn handle_search(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<sonic_rs::Value>, AppError> {
    let start = Instant::now();
    log_client_request(&state, &method, &uri, &headers);
    let result = search(&state, &query).await;
    log_client_response(&state, start, &result);
    result.map(Json)
}

/// GET /api/youtube/video?id=&playback=
pub async fn handle_video(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    Query(query): Query<VideoQuery>,
) -> Result<Json<sonic_rs::Value>, AppError> {
    let start = Instant::now();
    log_client_request(&state, &method, &uri, &headers);
    let result = video(&state, &query).await;
    log_client_response(&state, start, &result);
    result.map(Json)
}

/// GET /api/youtube/related?id=&limit=
pub async fn handle_related(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    Query(query): Query<RelatedQuery>,
) -> Result<Json<sonic_rs::Value>, AppError> {
    let start = Instant::now();
    log_client_request(&state, &method, &uri, &headers);
    let result = related(&state, &query).await;
    log_client_response(&state, start, &result);
    result.map(Json)
}

async fn search(state: &AppState, query: &SearchQuery) -> Result<sonic_rs::Value, AppError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(AppError::bad_request("缺少查询参数 q"));
    }
    let limit = clamp_limit(query.limit, DEFAULT_SEARCH_LIMIT);

    let req = ExecuteRequest::new(
        PriorityClass::Search,
        "search",
        format!("youtube_search:{}:{limit}", q.to_lowercase()),
    )
    .cache_for(state.cfg.cache_ttl);

    let client = &state.client;
    let value = state
        .orchestrator
        .execute(&req, |key| async move {
            client.search(&key, q, limit).await.map_err(WorkError::from)
        })
        .await?;
    Ok(value)
}

async fn video(state: &AppState, query: &VideoQuery) -> Result<sonic_rs::Value, AppError> {
    let id = query.id.trim();
    if id.is_empty() {
        return Err(AppError::bad_request("缺少视频 id"));
    }

    let class = if query.playback {
        PriorityClass::Playback
    } else {
        PriorityClass::ArtistInfo
    };
    let req = ExecuteRequest::new(class, "videos", format!("youtube_video:{id}"))
        .reserved(query.playback)
        .cache_for(state.cfg.cache_ttl);

    let client = &state.client;
    let value = state
        .orchestrator
        .execute(&req, |key| async move {
            client.video(&key, id).await.map_err(WorkError::from)
        })
        .await?;
    Ok(value)
}

async fn related(state: &AppState, query: &RelatedQuery) -> Result<sonic_rs::Value, AppError> {
    let id = query.id.trim();
    if id.is_empty() {
        return Err(AppError::bad_request("缺少视频 id"));
    }
    let limit = clamp_limit(query.limit, DEFAULT_RELATED_LIMIT);

    let req = ExecuteRequest::new(
        PriorityClass::Recommendations,
        "search",
        format!("youtube_related:{id}:{limit}"),
    )
    .cache_for(state.cfg.cache_ttl);

    let client = &state.client;
    let value = state
        .orchestrator
        .execute(&req, |key| async move {
            client.related(&key, id, limit).await.map_err(WorkError::from)
        })
        .await?;
    Ok(value)
}

fn clamp_limit(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn log_client_request(state: &AppState, method: &Method, uri: &OriginalUri, headers: &HeaderMap) {
    if !state.cfg.log_level().client_enabled() {
        return;
    }
    let path = uri
        .0
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_else(|| uri.0.path());
    logging::client_request(method.as_str(), path, headers);
}

fn log_client_response(
    state: &AppState,
    start: Instant,
    result: &Result<sonic_rs::Value, AppError>,
) {
    if !state.cfg.log_level().client_enabled() {
        return;
    }
    match result {
        Ok(v) => logging::client_response(200, start.elapsed(), Some(v)),
        Err(e) => {
            let err = sonic_rs::json!({ "error": e.to_string() });
            logging::client_response(e.status_code().as_u16(), start.elapsed(), Some(&err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::config::Config;
    use crate::gateway::router;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const QUOTA_KEY: &str = "exhausted-key-0001";

    #[derive(Default)]
    struct FakeUpstream {
        hits: AtomicUsize,
    }

    /// 伪 YouTube：按 key 返回配额错误，q 以 invalid 开头时返回 400，其余回显 key。
    async fn fake_resource(
        State(up): State<Arc<FakeUpstream>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        up.hits.fetch_add(1, Ordering::SeqCst);
        let key = params.get("key").cloned().unwrap_or_default();

        if key == QUOTA_KEY {
            let body = serde_json::json!({
                "error": {
                    "code": 403,
                    "message": "The request cannot be completed because you have exceeded your quota.",
                    "errors": [{ "reason": "quotaExceeded", "domain": "youtube.quota" }]
                }
            });
            return (StatusCode::FORBIDDEN, Json(body)).into_response();
        }

        if params.get("q").is_some_and(|q| q.starts_with("invalid")) {
            let body = serde_json::json!({
                "error": {
                    "code": 400,
                    "message": "Invalid value for parameter q",
                    "errors": [{ "reason": "invalidParameter" }]
                }
            });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }

        Json(serde_json::json!({ "items": [{ "key": key, "params": params }] })).into_response()
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_config(upstream: &str, keys: &[&str], reserved: Option<usize>) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            api_keys: keys.iter().map(|k| crate::credential::ApiKey::new(*k)).collect(),
            playback_key_index: reserved,
            daily_quota_limit: 10_000,
            quota_warning_ratio: 0.8,
            cache_capacity: 100,
            cache_sweep_interval: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(60),
            upstream_base_url: upstream.to_string(),
            api_user_agent: "ytquota-test".to_string(),
            timeout_ms: 5_000,
            proxy: String::new(),
            debug: "off".to_string(),
        }
    }

    struct Harness {
        gateway: String,
        upstream: Arc<FakeUpstream>,
        http: reqwest::Client,
    }

    impl Harness {
        async fn start(keys: &[&str], reserved: Option<usize>) -> Self {
            let upstream = Arc::new(FakeUpstream::default());
            let upstream_url = serve(
                Router::new()
                    .route("/search", get(fake_resource))
                    .route("/videos", get(fake_resource))
                    .with_state(upstream.clone()),
            )
            .await;

            let cfg = test_config(&upstream_url, keys, reserved);
            let state = AppState::build(cfg, clock::system()).await.unwrap();
            let gateway = serve(router(Arc::new(state))).await;

            Self {
                gateway,
                upstream,
                http: reqwest::Client::builder().no_proxy().build().unwrap(),
            }
        }

        async fn get(&self, path: &str) -> (StatusCode, serde_json::Value) {
            let resp = self
                .http
                .get(format!("{}{path}", self.gateway))
                .send()
                .await
                .unwrap();
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
            (status, resp.json().await.unwrap())
        }

        async fn class_consumed(&self, class: &str) -> u64 {
            let (_, status) = self.get("/manager/api/status").await;
            status["classes"]["classes"]
                .as_array()
                .unwrap()
                .iter()
                .find(|c| c["class"] == class)
                .and_then(|c| c["consumed"].as_u64())
                .unwrap()
        }

        fn upstream_hits(&self) -> usize {
            self.upstream.hits.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn unreachable_upstream_error_hides_key() {
        let secret = "AIzaSyFULLSECRETKEYVALUE1234";
        let cfg = test_config("http://127.0.0.1:1", &[secret], None);
        let state = AppState::build(cfg, clock::system()).await.unwrap();
        let gateway = serve(router(Arc::new(state))).await;

        let resp = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(format!("{gateway}/api/youtube/search?q=lofi"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 502);
        let body = resp.text().await.unwrap();
        assert!(body.contains("upstream_failed"));
        assert!(!body.contains(secret));
    }

    #[tokio::test]
    async fn search_is_cached_and_charged_once() {
        let h = Harness::start(&["general-key-0001", "general-key-0002"], None).await;

        let (status, body) = h.get("/api/youtube/search?q=lofi&limit=5").await;
        assert_eq!(status, StatusCode::OK);
        // 两把密钥时最后一把自动预留，搜索走第一把。
        assert_eq!(body["items"][0]["key"], "general-key-0001");
        assert_eq!(body["items"][0]["params"]["q"], "lofi music");
        assert_eq!(body["items"][0]["params"]["maxResults"], "5");

        let (status, again) = h.get("/api/youtube/search?q=LOFI&limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again, body);

        assert_eq!(h.upstream_hits(), 1);
        assert_eq!(h.class_consumed("search").await, 100);
    }

    #[tokio::test]
    async fn missing_params_are_rejected_without_quota() {
        let h = Harness::start(&["general-key-0001"], None).await;

        let (status, body) = h.get("/api/youtube/search?q=%20%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "bad_request");

        let (status, _) = h.get("/api/youtube/video").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(h.upstream_hits(), 0);
        assert_eq!(h.class_consumed("search").await, 0);
        assert_eq!(h.class_consumed("playback").await, 0);
    }

    #[tokio::test]
    async fn playback_video_uses_reserved_key() {
        let h = Harness::start(&["general-key-0001", "playback-key-0001"], Some(1)).await;

        let (status, body) = h.get("/api/youtube/video?id=abc&playback=true").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["key"], "playback-key-0001");
        assert_eq!(body["items"][0]["params"]["id"], "abc");

        let (status, body) = h.get("/api/youtube/video?id=xyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["key"], "general-key-0001");

        assert_eq!(h.class_consumed("playback").await, 1);
        assert_eq!(h.class_consumed("artist_info").await, 1);
    }

    #[tokio::test]
    async fn quota_rejected_key_is_disabled_and_skipped() {
        let h = Harness::start(
            &[QUOTA_KEY, "general-key-0002", "reserved-key-0003"],
            None,
        )
        .await;

        let (status, body) = h.get("/api/youtube/related?id=abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["key"], "general-key-0002");
        assert_eq!(body["items"][0]["params"]["relatedToVideoId"], "abc");
        assert_eq!(h.upstream_hits(), 2);

        let (_, status) = h.get("/manager/api/status").await;
        let creds = status["credentials"]["credentials"].as_array().unwrap();
        assert_eq!(creds[0]["enabled"], false);
        assert_eq!(creds[0]["key"], "exha...0001");
        assert_eq!(creds[1]["consumed"], 100);
        assert_eq!(status["credentials"]["disabled"], 1);
        assert_eq!(h.class_consumed("recommendations").await, 100);
    }

    #[tokio::test]
    async fn upstream_bad_request_maps_to_400_without_charge() {
        let h = Harness::start(&["general-key-0001", "general-key-0002"], None).await;

        let (status, body) = h.get("/api/youtube/search?q=invalid%20query").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "malformed_request");
        assert_eq!(h.upstream_hits(), 1);
        assert_eq!(h.class_consumed("search").await, 0);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = Harness::start(&[], None).await;
        let resp = h
            .http
            .get(format!("{}/health", h.gateway))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 10), 10);
        assert_eq!(clamp_limit(Some(0), 10), 1);
        assert_eq!(clamp_limit(Some(500), 10), MAX_LIMIT);
    }
}
