use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// 调用方意图分类；每类拥有独立的每日配额上限。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Playback,
    Search,
    Recommendations,
    Explore,
    Genres,
    ArtistInfo,
    PlaylistInfo,
}

impl PriorityClass {
    pub const ALL: [PriorityClass; 7] = [
        PriorityClass::Playback,
        PriorityClass::Search,
        PriorityClass::Recommendations,
        PriorityClass::Explore,
        PriorityClass::Genres,
        PriorityClass::ArtistInfo,
        PriorityClass::PlaylistInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playback => "playback",
            Self::Search => "search",
            Self::Recommendations => "recommendations",
            Self::Explore => "explore",
            Self::Genres => "genres",
            Self::ArtistInfo => "artist_info",
            Self::PlaylistInfo => "playlist_info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个分类的配额策略（成本单位由调用方配置）。
#[derive(Debug, Clone)]
pub struct ClassPolicy {
    /// 占池总容量的比例；未配置绝对上限时据此推导。
    pub reserved_fraction: f64,
    /// 绝对每日上限；`None` 表示按 reserved_fraction × 池容量计算。
    pub ceiling: Option<u64>,
    /// 未知操作的兜底成本。
    pub default_cost: u64,
    pub costs: HashMap<String, u64>,
}

impl ClassPolicy {
    pub fn new(reserved_fraction: f64, ceiling: Option<u64>, default_cost: u64) -> Self {
        Self {
            reserved_fraction,
            ceiling,
            default_cost,
            costs: HashMap::new(),
        }
    }

    pub fn with_cost(mut self, operation: &str, cost: u64) -> Self {
        self.costs.insert(operation.to_string(), cost);
        self
    }

    pub fn cost_of(&self, operation: &str) -> u64 {
        self.costs
            .get(operation)
            .copied()
            .unwrap_or(self.default_cost)
    }

    pub fn effective_ceiling(&self, pool_capacity: u64) -> u64 {
        if let Some(c) = self.ceiling {
            return c;
        }
        let frac = if self.reserved_fraction.is_finite() {
            self.reserved_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (pool_capacity as f64 * frac) as u64
    }
}

/// YouTube Data API 常见操作的估算成本。
const DEFAULT_OPERATION_COSTS: [(&str, u64); 5] = [
    ("search", 100),
    ("videos", 1),
    ("channels", 1),
    ("playlistItems", 1),
    ("playlists", 1),
];

/// 默认策略（播放 60%、搜索 25%，其余分给后台类操作）。
pub fn default_policies() -> HashMap<PriorityClass, ClassPolicy> {
    let table = [
        (PriorityClass::Playback, 0.60, 8000, 1),
        (PriorityClass::Search, 0.25, 1500, 100),
        (PriorityClass::Recommendations, 0.05, 500, 50),
        (PriorityClass::Explore, 0.03, 300, 10),
        (PriorityClass::Genres, 0.03, 300, 10),
        (PriorityClass::ArtistInfo, 0.02, 200, 10),
        (PriorityClass::PlaylistInfo, 0.02, 200, 10),
    ];

    table
        .into_iter()
        .map(|(class, frac, ceiling, default_cost)| {
            let policy = DEFAULT_OPERATION_COSTS.iter().fold(
                ClassPolicy::new(frac, Some(ceiling), default_cost),
                |p, (op, cost)| p.with_cost(op, *cost),
            );
            (class, policy)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStatus {
    pub class: PriorityClass,
    pub reserved_fraction: f64,
    pub consumed: u64,
    pub pending: u64,
    pub ceiling: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocatorStatus {
    pub window_started_at: DateTime<Utc>,
    pub classes: Vec<ClassStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_names_only() {
        assert_eq!(PriorityClass::parse(" Playback "), Some(PriorityClass::Playback));
        assert_eq!(
            PriorityClass::parse("artist_info"),
            Some(PriorityClass::ArtistInfo)
        );
        assert_eq!(PriorityClass::parse("music"), None);
    }

    #[test]
    fn cost_lookup_falls_back_to_default() {
        let p = ClassPolicy::new(0.1, None, 7).with_cost("search", 100);
        assert_eq!(p.cost_of("search"), 100);
        assert_eq!(p.cost_of("unknown"), 7);
    }

    #[test]
    fn ceiling_derives_from_fraction_when_unset() {
        let p = ClassPolicy::new(0.25, None, 1);
        assert_eq!(p.effective_ceiling(20_000), 5_000);
        let p = ClassPolicy::new(0.25, Some(42), 1);
        assert_eq!(p.effective_ceiling(20_000), 42);
    }

    #[test]
    fn default_policies_cover_every_class() {
        let p = default_policies();
        for class in PriorityClass::ALL {
            assert!(p.contains_key(&class));
        }
        assert_eq!(p[&PriorityClass::Search].cost_of("search"), 100);
        assert_eq!(p[&PriorityClass::Recommendations].cost_of("related"), 50);
    }
}
