//! 标签修正建议。
//!
//! 主元数据提供商给出的标题、艺术家经常是译名或罗马音，
//! 而地区曲库或参考曲库里往往是原文。本模块比较这些来源，
//! 只给出与规范元数据不同的字段。

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    error::Result,
    model::track::{DiscoveredMetadata, TagProposal, TrackMeta},
};

pub mod musicbrainz;

/// 参考曲库中的一条录音记录。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceRecord {
    /// 录音标题。
    pub title: String,
    /// 署名艺术家，按顺序排列。
    pub artist_credits: Vec<String>,
    /// 收录该录音的发行。
    pub releases: Vec<ReferenceRelease>,
}

/// 一个发行（专辑、单曲等）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceRelease {
    /// 发行标题。
    pub title: String,
    /// 发行状态，例如 "Official"、"Bootleg"。
    pub status: Option<String>,
}

impl ReferenceRecord {
    /// 署名艺术家以 `, ` 连接。
    pub fn joined_artist(&self) -> String {
        self.artist_credits
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// 优先取第一个正式发行，否则取第一个发行。
    pub fn preferred_album(&self) -> Option<&str> {
        self.releases
            .iter()
            .find(|r| {
                r.status
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case("official"))
            })
            .or_else(|| self.releases.first())
            .map(|r| r.title.as_str())
    }
}

/// 可按 ISRC 或艺术家 + 标题查询的参考曲库。
#[async_trait]
pub trait ReferenceCatalog: Send + Sync {
    /// 按 ISRC 查找，返回第一条记录。
    async fn find_by_isrc(&self, isrc: &str) -> Result<Option<ReferenceRecord>>;

    /// 按艺术家和标题查找，返回第一条记录。
    async fn find_by_artist_title(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<ReferenceRecord>>;
}

/// 候选值非空且与基准值（去首尾空白后，区分大小写）不同时返回候选值。
fn differing(candidate: &str, baseline: &str) -> Option<String> {
    let candidate = candidate.trim();
    (!candidate.is_empty() && candidate != baseline.trim()).then(|| candidate.to_string())
}

fn proposal_from_discovered(canonical: &TrackMeta, discovered: &DiscoveredMetadata) -> TagProposal {
    TagProposal {
        title: differing(&discovered.title, &canonical.title),
        artist: differing(&discovered.artist, &canonical.artist),
        album: differing(&discovered.album, &canonical.album),
        album_artist: None,
    }
}

fn proposal_from_record(canonical: &TrackMeta, record: &ReferenceRecord) -> TagProposal {
    let artist = record.joined_artist();
    TagProposal {
        title: differing(&record.title, &canonical.title),
        artist: differing(&artist, &canonical.artist),
        album: record
            .preferred_album()
            .and_then(|album| differing(album, &canonical.album)),
        album_artist: differing(&artist, &canonical.artist),
    }
}

async fn lookup_reference(
    reference: &dyn ReferenceCatalog,
    canonical: &TrackMeta,
) -> Option<ReferenceRecord> {
    if let Some(isrc) = canonical.isrc.as_deref().map(str::trim)
        && !isrc.is_empty()
    {
        match reference.find_by_isrc(isrc).await {
            Ok(Some(record)) => return Some(record),
            Ok(None) => debug!("ISRC {} 没有匹配的录音", isrc),
            Err(e) => warn!("按 ISRC 查询参考曲库失败: {}", e),
        }
    }

    match reference
        .find_by_artist_title(&canonical.artist, &canonical.title)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            warn!("按艺术家和标题查询参考曲库失败: {}", e);
            None
        }
    }
}

/// 给出标签修正建议。
///
/// 1. 有发现的元数据且其中某个非空字段与规范元数据不同时，只用它给出建议。
/// 2. 否则查询参考曲库（先 ISRC，再艺术家 + 标题），用第一条记录给出建议。
///
/// 参考曲库的任何失败都视为没有结果。没有可修正的字段时返回 `None`。
pub async fn propose(
    canonical: &TrackMeta,
    discovered: Option<&DiscoveredMetadata>,
    reference: Option<&dyn ReferenceCatalog>,
) -> Option<TagProposal> {
    if let Some(discovered) = discovered {
        let proposal = proposal_from_discovered(canonical, discovered);
        if !proposal.is_empty() {
            debug!("使用下载时发现的元数据修正标签: {:?}", proposal);
            return Some(proposal);
        }
    }

    let record = lookup_reference(reference?, canonical).await?;
    let proposal = proposal_from_record(canonical, &record);
    if proposal.is_empty() {
        None
    } else {
        debug!("使用参考曲库修正标签: {:?}", proposal);
        Some(proposal)
    }
}
