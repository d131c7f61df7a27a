//! 定义了与单首歌曲相关的核心数据结构：下载目标、规范元数据、下载过程中顺带发现的元数据，以及标签修正建议。

use serde::{Deserialize, Serialize};

/// 一次下载解析的目标歌曲。
///
/// 只有值语义，没有身份。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WantedTrack {
    /// 艺术家。
    pub artist: String,
    /// 歌曲标题。
    pub title: String,
}

impl WantedTrack {
    /// 创建一个新的下载目标。
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }
}

/// 一张封面图片。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverImage {
    /// 图片 URL。
    pub url: String,
    /// 宽度（像素）。
    pub width: Option<u32>,
    /// 高度（像素）。
    pub height: Option<u32>,
}

/// 由主元数据提供商（Spotify）给出的规范元数据。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMeta {
    /// 歌曲标题。
    pub title: String,
    /// 艺术家，多位艺术家以 `, ` 连接。
    pub artist: String,
    /// 专辑名。
    pub album: String,
    /// 国际标准录音代码。
    pub isrc: Option<String>,
    /// 专辑内的曲目序号。
    pub track_number: Option<u32>,
    /// 专辑曲目总数。
    pub total_tracks: Option<u32>,
    /// 碟片序号。
    pub disc_number: Option<u32>,
    /// 发行日期，格式如 "YYYY", "YYYY-MM" 或 "YYYY-MM-DD"。
    pub release_date: Option<String>,
    /// 封面图片列表，通常按尺寸从大到小排列。
    pub images: Vec<CoverImage>,
}

impl TrackMeta {
    /// 从发行日期中解析出年份。
    pub fn release_year(&self) -> Option<u32> {
        self.release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }
}

/// 在地区曲库下载过程中顺带发现的元数据。
///
/// 即使下载失败（例如歌曲需要付费），只要识别出了候选，这些信息仍然有价值。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredMetadata {
    /// 候选的歌曲标题。
    pub title: String,
    /// 候选的艺术家。
    pub artist: String,
    /// 候选的专辑名，可能为空。
    pub album: String,
}

/// 标签修正建议。
///
/// 只有与规范元数据不同的字段才会被填充；字段缺失表示“保持原值”。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagProposal {
    /// 建议的标题。
    pub title: Option<String>,
    /// 建议的艺术家。
    pub artist: Option<String>,
    /// 建议的专辑名。
    pub album: Option<String>,
    /// 建议的专辑艺术家。
    pub album_artist: Option<String>,
}

impl TagProposal {
    /// 没有任何建议字段。
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.album_artist.is_none()
    }
}

/// 最终写入音频文件的完整标签集合。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    /// 标题。
    pub title: String,
    /// 艺术家。
    pub artist: String,
    /// 专辑名。
    pub album: String,
    /// 专辑艺术家。
    pub album_artist: Option<String>,
    /// 曲目序号。
    pub track_number: Option<u32>,
    /// 曲目总数。
    pub total_tracks: Option<u32>,
    /// 碟片序号。
    pub disc_number: Option<u32>,
    /// 年份。
    pub year: Option<u32>,
}

impl TagSet {
    /// 以规范元数据为基准，叠加修正建议，生成最终标签。
    pub fn from_meta(meta: &TrackMeta, proposal: Option<&TagProposal>) -> Self {
        let pick = |proposed: Option<&String>, original: &str| {
            proposed.cloned().unwrap_or_else(|| original.to_string())
        };
        let proposal = proposal.cloned().unwrap_or_default();

        Self {
            title: pick(proposal.title.as_ref(), &meta.title),
            artist: pick(proposal.artist.as_ref(), &meta.artist),
            album: pick(proposal.album.as_ref(), &meta.album),
            album_artist: proposal.album_artist,
            track_number: meta.track_number,
            total_tracks: meta.total_tracks,
            disc_number: meta.disc_number,
            year: meta.release_year(),
        }
    }
}
