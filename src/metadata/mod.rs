//! 主元数据提供商。
//!
//! 批量下载的每一首歌都先从这里取得规范元数据，再据此搜索音源。

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::{error::Result, model::track::TrackMeta};

pub mod spotify;

static TRACK_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"track/([a-zA-Z0-9]+)").expect("编译 TRACK_URL_REGEX 失败"));
static TRACK_URI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"spotify:track:([a-zA-Z0-9]+)").expect("编译 TRACK_URI_REGEX 失败")
});
static COLLECTION_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(playlist|album)/([a-zA-Z0-9]+)").expect("编译 COLLECTION_URL_REGEX 失败")
});
static COLLECTION_URI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"spotify:(playlist|album):([a-zA-Z0-9]+)").expect("编译 COLLECTION_URI_REGEX 失败")
});

/// 从 URL、`spotify:track:` URI 或裸 ID 中提取歌曲 ID。
pub fn parse_track_id(track_ref: &str) -> Option<String> {
    let track_ref = track_ref.trim();
    if let Some(caps) = TRACK_URI_REGEX
        .captures(track_ref)
        .or_else(|| TRACK_URL_REGEX.captures(track_ref))
    {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    (!track_ref.is_empty() && track_ref.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| track_ref.to_string())
}

/// 歌单或专辑的引用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRef {
    /// 歌单 ID。
    Playlist(String),
    /// 专辑 ID。
    Album(String),
}

/// 从 URL、`spotify:playlist:` / `spotify:album:` URI 中提取歌单或专辑 ID。
///
/// 裸 ID 按歌单处理。
pub fn parse_collection_ref(collection_ref: &str) -> Option<CollectionRef> {
    let collection_ref = collection_ref.trim();
    if let Some(caps) = COLLECTION_URI_REGEX
        .captures(collection_ref)
        .or_else(|| COLLECTION_URL_REGEX.captures(collection_ref))
    {
        let id = caps[2].to_string();
        return Some(match &caps[1] {
            "album" => CollectionRef::Album(id),
            _ => CollectionRef::Playlist(id),
        });
    }

    (!collection_ref.is_empty() && collection_ref.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| CollectionRef::Playlist(collection_ref.to_string()))
}

/// 歌单或专辑展开后的歌曲列表。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackCollection {
    /// 歌单或专辑名。
    pub name: String,
    /// 按原顺序排列的歌曲引用，可直接传给 [`MetadataProvider::get_track_meta`]。
    pub tracks: Vec<String>,
}

/// 能按引用取得规范元数据的提供商。
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// 获取一首歌的规范元数据。失败意味着放弃这一首。
    async fn get_track_meta(&self, track_ref: &str) -> Result<TrackMeta>;

    /// 把歌单或专辑展开为歌曲引用列表。
    async fn get_collection_tracks(&self, collection_ref: &str) -> Result<TrackCollection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track_id() {
        assert_eq!(
            parse_track_id("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc").as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            parse_track_id("spotify:track:4uLU6hMCjMI75M1A2tKUQC").as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            parse_track_id(" 4uLU6hMCjMI75M1A2tKUQC ").as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(parse_track_id("https://open.spotify.com/album/xyz"), None);
        assert_eq!(parse_track_id(""), None);
    }

    #[test]
    fn test_parse_collection_ref() {
        assert_eq!(
            parse_collection_ref("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=1"),
            Some(CollectionRef::Playlist("37i9dQZF1DXcBWIGoYBM5M".to_string()))
        );
        assert_eq!(
            parse_collection_ref("https://open.spotify.com/album/4aawyAB9vmqN3uQ7FjRGTy"),
            Some(CollectionRef::Album("4aawyAB9vmqN3uQ7FjRGTy".to_string()))
        );
        assert_eq!(
            parse_collection_ref("spotify:album:4aawyAB9vmqN3uQ7FjRGTy"),
            Some(CollectionRef::Album("4aawyAB9vmqN3uQ7FjRGTy".to_string()))
        );
        assert_eq!(
            parse_collection_ref("37i9dQZF1DXcBWIGoYBM5M"),
            Some(CollectionRef::Playlist("37i9dQZF1DXcBWIGoYBM5M".to_string()))
        );
        assert_eq!(parse_collection_ref("https://open.spotify.com/track/xyz"), None);
        assert_eq!(parse_collection_ref(" "), None);
    }
}
