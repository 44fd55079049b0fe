use axum::http::HeaderMap;
use std::borrow::Cow;
use std::time::Duration;

/// 日志等级：
/// - off：不输出客户端/后端的详细请求响应
/// - low：输出客户端请求/响应
/// - medium / high：输出客户端 + 后端请求/响应（high 不格式化响应体）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "client" => Self::Low,
            "medium" | "backend" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn client_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn backend_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn client_request(method: &str, path: &str, headers: &HeaderMap) {
    tracing::info!(
        "\n===================== 客户端请求 ======================\n[客户端请求] {method} {}\n[客户端请求头]\n{}\n=========================================================",
        redact_query_key(path),
        format_headers(headers),
    );
}

pub fn client_response(status: u16, duration: Duration, body: Option<&sonic_rs::Value>) {
    tracing::info!(
        "\n===================== 客户端响应 ======================\n[客户端响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        body.map(format_body_value).unwrap_or_default()
    );
}

pub fn backend_request(method: &str, url: &str) {
    tracing::info!(
        "\n====================== 后端请求 ========================\n[后端请求] {method} {}\n==========================================================",
        redact_query_key(url),
    );
}

pub fn backend_response(status: u16, duration: Duration, body: &[u8], raw: bool) {
    let body = if raw {
        String::from_utf8_lossy(body).into_owned()
    } else {
        format_body_bytes(body)
    };
    tracing::info!(
        "\n====================== 后端响应 ========================\n[后端响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        body
    );
}

/// 把 URL 中的 `key=` 查询参数替换为掩码形式，其他参数原样保留。
pub fn redact_query_key(url: &str) -> Cow<'_, str> {
    let Some((base, query)) = url.split_once('?') else {
        return Cow::Borrowed(url);
    };
    if !query.split('&').any(|p| p.starts_with("key=")) {
        return Cow::Borrowed(url);
    }

    let parts: Vec<String> = query
        .split('&')
        .map(|p| match p.strip_prefix("key=") {
            Some(v) => format!("key={}", crate::credential::types::mask_key(v)),
            None => p.to_string(),
        })
        .collect();
    Cow::Owned(format!("{base}?{}", parts.join("&")))
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        let key_lc = key.to_lowercase();
        let redacted = key_lc == "authorization"
            || key_lc == "proxy-authorization"
            || key_lc == "x-api-key"
            || key_lc == "x-goog-api-key"
            || key_lc == "cookie";

        let val = if redacted {
            "***"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        out.push_str(key);
        out.push_str(": ");
        out.push_str(val);
        out.push('\n');
    }
    out
}

fn format_body_value(v: &sonic_rs::Value) -> String {
    match sonic_rs::to_string_pretty(v) {
        Ok(s) => truncate_text_for_log(&s),
        Err(_) => truncate_text_for_log(&v.to_string()),
    }
}

fn format_body_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    // 极端大包：避免为了日志反序列化/格式化而产生巨额内存与 CPU 开销。
    const MAX_PARSE_BYTES: usize = 2 * 1024 * 1024;
    const HEAD_TAIL: usize = 16 * 1024;

    if bytes.len() > MAX_PARSE_BYTES {
        let head_len = bytes.len().min(HEAD_TAIL);
        let tail_len = bytes.len().saturating_sub(head_len).min(HEAD_TAIL);
        let head = String::from_utf8_lossy(&bytes[..head_len]);
        let tail = String::from_utf8_lossy(&bytes[bytes.len() - tail_len..]);
        return format!(
            "(body too large: {} bytes, showing head/tail)\n--- head ---\n{}\n--- tail ---\n{}",
            bytes.len(),
            truncate_text_for_log(&head),
            truncate_text_for_log(&tail)
        );
    }

    match sonic_rs::from_slice::<sonic_rs::Value>(bytes) {
        Ok(v) => format_body_value(&v),
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 32 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}
