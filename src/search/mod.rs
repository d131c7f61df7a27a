//! 搜索模块
//!
//! 地区曲库的全文搜索分词并不稳定，同一首歌换个关键词写法结果可能完全不同。
//! 这里按固定顺序逐级放宽关键词，直到某一级得到相关候选集合为止。

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    error::{DownloaderError, Result},
    model::{candidate::CandidateRecord, track::WantedTrack},
};

pub mod matcher;
use matcher::{Ranking, rank};

static PUNCTUATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[!,\-\s()\[\]]").expect("编译 PUNCTUATION_REGEX 失败"));

/// 能按关键词返回原始候选的曲库。
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// 按关键词搜索，返回标准化后的候选，顺序即上游返回顺序。
    async fn search(&self, keyword: &str) -> Result<Vec<CandidateRecord>>;
}

/// 把标题中的标点与括号逐个替换为空格（不合并），再去掉首尾空白。
pub fn clean_title(title: &str) -> String {
    PUNCTUATION_REGEX.replace_all(title, " ").trim().to_string()
}

/// 按尝试顺序生成关键词变体。
///
/// 1. 艺术家 + 标题
/// 2. 仅标题
/// 3. 标题 + 艺术家
/// 4. 清理后的标题
/// 5. 艺术家 + 清理后的标题
pub fn widen_queries(wanted: &WantedTrack) -> Vec<String> {
    let artist = wanted.artist.trim();
    let title = wanted.title.trim();
    let cleaned = clean_title(title);

    vec![
        format!("{artist} {title}"),
        title.to_string(),
        format!("{title} {artist}"),
        cleaned.clone(),
        format!("{artist} {cleaned}"),
    ]
}

/// 一次逐级搜索最终选中的候选集合。
#[derive(Debug, Clone, PartialEq)]
pub struct WidenedSelection {
    /// 产生该集合的关键词。
    pub query: String,
    /// 相关集合或兜底集合，不会是 `Ranking::Empty`。
    pub ranking: Ranking,
}

/// 逐级放宽关键词搜索，返回第一个相关集合。
///
/// 没有任何一级得到相关集合时，如果 `allow_fallback` 为真，
/// 使用第一个有原始结果的关键词的兜底集合。
///
/// # 返回
/// 一个 `Result`，失败时为 `NotFound`，或者所有关键词都出错时的最后一个错误。
pub async fn search_with_widening<C>(
    catalog: &C,
    wanted: &WantedTrack,
    allow_fallback: bool,
) -> Result<WidenedSelection>
where
    C: CatalogSearch + ?Sized,
{
    let mut fallback: Option<WidenedSelection> = None;
    let mut last_error: Option<DownloaderError> = None;

    for query in widen_queries(wanted) {
        if query.trim().is_empty() {
            continue;
        }
        debug!("尝试搜索关键词: \"{}\"", query);

        let results = match catalog.search(&query).await {
            Ok(results) => results,
            Err(DownloaderError::NotFound(_)) => Vec::new(),
            Err(e) => {
                warn!("搜索查询 \"{}\" 失败: {}", query, e);
                last_error = Some(e);
                continue;
            }
        };

        if results.is_empty() {
            continue;
        }
        debug!("查询 \"{}\" 返回 {} 个结果", query, results.len());

        match rank(&results, wanted, &query) {
            ranking @ Ranking::Relevant(_) => {
                info!(
                    "找到 {} 个高质量匹配结果，使用查询: \"{}\"",
                    ranking.candidates().len(),
                    query
                );
                return Ok(WidenedSelection { query, ranking });
            }
            ranking @ Ranking::Fallback(_) => {
                if allow_fallback && fallback.is_none() {
                    debug!(
                        "未找到高分匹配，暂存前 {} 个结果作为备用，查询: \"{}\"",
                        ranking.candidates().len(),
                        query
                    );
                    fallback = Some(WidenedSelection { query, ranking });
                }
            }
            Ranking::Empty => {}
        }
    }

    if let Some(selection) = fallback {
        warn!(
            "所有关键词都没有高分匹配，使用备用结果 (查询: \"{}\")",
            selection.query
        );
        return Ok(selection);
    }

    Err(last_error.unwrap_or_else(|| {
        DownloaderError::NotFound(format!("{} - {}", wanted.artist, wanted.title))
    }))
}
