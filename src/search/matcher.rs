//! 匹配算法模块：对地区曲库返回的候选打分并筛选。
//!
//! 上游的全文搜索容错但排序嘈杂，这里用确定性的加法打分重新排序，
//! 让最终选择可复现、可测试。

use crate::model::{
    candidate::{CandidateRecord, ScoredCandidate},
    track::WantedTrack,
};

/// 分数达到此值的候选被认为是“相关”的。
pub const RELEVANCE_THRESHOLD: i32 = 5;
/// 相关候选最多保留的数量。
pub const MAX_RELEVANT: usize = 5;
/// 没有相关候选时，兜底保留的数量。
pub const MAX_FALLBACK: usize = 3;

const TITLE_CONTAINS: i32 = 10;
const TITLE_EXACT: i32 = 15;
const ARTIST_CONTAINS: i32 = 8;
const ARTIST_EXACT: i32 = 12;
const TOKEN_HIT: i32 = 2;

/// 一批候选的筛选结果。
#[derive(Debug, Clone, PartialEq)]
pub enum Ranking {
    /// 至少一个候选达到相关阈值，按分数降序，最多 [`MAX_RELEVANT`] 个。
    Relevant(Vec<ScoredCandidate>),
    /// 有原始结果但没有相关候选，按分数降序保留前 [`MAX_FALLBACK`] 个。
    Fallback(Vec<ScoredCandidate>),
    /// 上游没有返回任何候选。
    Empty,
}

impl Ranking {
    /// 筛选后的候选，`Empty` 时为空切片。
    pub fn candidates(&self) -> &[ScoredCandidate] {
        match self {
            Ranking::Relevant(c) | Ranking::Fallback(c) => c,
            Ranking::Empty => &[],
        }
    }

    /// 是否为相关集合。
    pub fn is_relevant(&self) -> bool {
        matches!(self, Ranking::Relevant(_))
    }
}

/// 两个字符串（已小写、去空白）是否互相包含。空串不算匹配。
fn contains_either(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// 计算单个候选相对目标歌曲和本次搜索关键词的分数。
pub fn score_candidate(candidate: &CandidateRecord, wanted: &WantedTrack, search_query: &str) -> i32 {
    let song = candidate.song_name.trim().to_lowercase();
    let singer = candidate.singer_name.trim().to_lowercase();
    let title = wanted.title.trim().to_lowercase();
    let artist = wanted.artist.trim().to_lowercase();

    let mut score = 0;

    if contains_either(&song, &title) {
        score += TITLE_CONTAINS;
    }
    if !title.is_empty() && song == title {
        score += TITLE_EXACT;
    }

    if contains_either(&singer, &artist) {
        score += ARTIST_CONTAINS;
    }
    if !artist.is_empty() && singer == artist {
        score += ARTIST_EXACT;
    }

    let result_text = format!("{song} {singer}");
    let query = search_query.to_lowercase();
    let matched_tokens = query
        .split_whitespace()
        .filter(|token| token.chars().count() > 1 && result_text.contains(token))
        .count();
    score += matched_tokens as i32 * TOKEN_HIT;

    score
}

/// 对一批候选打分、排序并筛选。
///
/// 排序是稳定的：同分候选保持上游返回的先后顺序。
pub fn rank(candidates: &[CandidateRecord], wanted: &WantedTrack, search_query: &str) -> Ranking {
    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|candidate| {
            let match_score = score_candidate(candidate, wanted, search_query);
            tracing::trace!(
                "结果评分: {} - {} = {}分",
                candidate.singer_name,
                candidate.song_name,
                match_score
            );
            ScoredCandidate {
                candidate: candidate.clone(),
                match_score,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.match_score.cmp(&a.match_score));
    select_scored(scored)
}

/// 按阈值把已降序排列的候选分为相关集合或兜底集合。
fn select_scored(mut scored: Vec<ScoredCandidate>) -> Ranking {
    if scored.is_empty() {
        return Ranking::Empty;
    }

    let relevant_count = scored
        .iter()
        .take_while(|s| s.match_score >= RELEVANCE_THRESHOLD)
        .count();

    if relevant_count > 0 {
        scored.truncate(relevant_count.min(MAX_RELEVANT));
        Ranking::Relevant(scored)
    } else {
        scored.truncate(MAX_FALLBACK);
        Ranking::Fallback(scored)
    }
}
