use crate::cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_SWEEP_INTERVAL};
use crate::credential::{ApiKey, LedgerLimits};
use crate::credential::ledger::{DEFAULT_DAILY_CAP, DEFAULT_WARNING_RATIO};
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8046;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;
const DEFAULT_USER_AGENT: &str = "ytquota/0.1";
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// 编号密钥 YOUTUBE_API_KEY_1 ~ YOUTUBE_API_KEY_10。
const NUMBERED_KEY_SLOTS: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub api_keys: Vec<ApiKey>,
    pub playback_key_index: Option<usize>,

    pub daily_quota_limit: u64,
    pub quota_warning_ratio: f64,

    pub cache_capacity: u64,
    pub cache_sweep_interval: Duration,
    pub cache_ttl: Duration,

    pub upstream_base_url: String,
    pub api_user_agent: String,
    pub timeout_ms: u64,
    pub proxy: String,

    pub debug: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "PLAYBACK_KEY_INDEX")]
    playback_key_index: Option<usize>,
    #[serde(alias = "DAILY_QUOTA_LIMIT")]
    daily_quota_limit: Option<u64>,
    #[serde(alias = "QUOTA_WARNING_RATIO")]
    quota_warning_ratio: Option<f64>,

    #[serde(alias = "CACHE_CAPACITY")]
    cache_capacity: Option<u64>,
    #[serde(alias = "CACHE_SWEEP_INTERVAL_SECS")]
    cache_sweep_interval_secs: Option<u64>,
    #[serde(alias = "CACHE_TTL_SECS")]
    cache_ttl_secs: Option<u64>,

    #[serde(alias = "UPSTREAM_BASE_URL")]
    upstream_base_url: Option<String>,
    #[serde(alias = "API_USER_AGENT")]
    api_user_agent: Option<String>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let (api_keys, playback_from_env) = collect_api_keys(|name| std::env::var(name).ok());

        let mut cfg = Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            api_keys,
            playback_key_index: raw.playback_key_index.or(playback_from_env),
            daily_quota_limit: raw.daily_quota_limit.unwrap_or(DEFAULT_DAILY_CAP),
            quota_warning_ratio: raw.quota_warning_ratio.unwrap_or(DEFAULT_WARNING_RATIO),
            cache_capacity: raw.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            cache_sweep_interval: raw
                .cache_sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            cache_ttl: Duration::from_secs(raw.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            upstream_base_url: raw
                .upstream_base_url
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string()),
            api_user_agent: raw
                .api_user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
        };

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }

    pub fn ledger_limits(&self) -> LedgerLimits {
        LedgerLimits {
            daily_cap: self.daily_quota_limit,
            warning_ratio: self.quota_warning_ratio,
        }
    }
}

/// 按固定顺序收集密钥：单密钥、编号密钥、播放专用密钥（追加在最后）。
///
/// 重复值只保留第一次出现；返回播放专用密钥在结果中的位置（如配置了）。
fn collect_api_keys<F>(lookup: F) -> (Vec<ApiKey>, Option<usize>)
where
    F: Fn(&str) -> Option<String>,
{
    let mut names = vec!["YOUTUBE_API_KEY".to_string()];
    names.extend((1..=NUMBERED_KEY_SLOTS).map(|i| format!("YOUTUBE_API_KEY_{i}")));

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for name in &names {
        let Some(v) = lookup(name) else {
            continue;
        };
        let v = v.trim().to_string();
        if !v.is_empty() && seen.insert(v.clone()) {
            keys.push(ApiKey::new(v));
        }
    }

    let mut playback_index = None;
    if let Some(v) = lookup("YOUTUBE_API_KEY_PLAYBACK") {
        let v = v.trim().to_string();
        if !v.is_empty() {
            playback_index = Some(match keys.iter().position(|k| k.expose() == v) {
                Some(i) => i,
                None => {
                    keys.push(ApiKey::new(v));
                    keys.len() - 1
                }
            });
        }
    }

    (keys, playback_index)
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // 已存在的环境变量优先于 .env。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段（尚未创建运行时线程外的并发读取）加载 .env。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let parent = dir.parent()?;
        if parent == dir {
            return None;
        }
        dir = parent;
    }
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    if raw.len() >= 2 {
        let quoted = (raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\''));
        if quoted {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}
