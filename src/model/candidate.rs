//! 定义了地区曲库搜索候选及其评分结果。

use serde::{Deserialize, Serialize};

use crate::model::track::DiscoveredMetadata;

/// 从地区曲库的搜索响应中标准化出来的一条候选。
///
/// 上游字段名在不同响应里并不统一，标准化逻辑见
/// [`crate::providers::kugou::models::normalize_candidate`]。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// 候选在上游的唯一标识（酷狗为文件 hash）。
    pub source_id: String,
    /// 歌曲名。
    pub song_name: String,
    /// 演唱者。
    pub singer_name: String,
    /// 专辑名。
    pub album_name: Option<String>,
    /// 时长，单位由上游决定（通常为秒）。
    pub duration: Option<u64>,
    /// 文件大小（字节）。
    pub file_size: Option<u64>,
}

impl CandidateRecord {
    /// 把候选转换成下载结果里携带的“发现的元数据”。
    ///
    /// 候选缺少标题或艺术家时回退到目标歌曲的值。
    pub fn discovered_metadata(&self, fallback_title: &str, fallback_artist: &str) -> DiscoveredMetadata {
        let or_fallback = |value: &str, fallback: &str| {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        DiscoveredMetadata {
            title: or_fallback(&self.song_name, fallback_title),
            artist: or_fallback(&self.singer_name, fallback_artist),
            album: self.album_name.clone().unwrap_or_default(),
        }
    }
}

/// 附带匹配分数的候选。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// 原始候选。
    pub candidate: CandidateRecord,
    /// 匹配分数，越高越好。
    pub match_score: i32,
}
