//! 此模块处理 KuGouMusicApi 本地服务的响应。
//! API 来源于 <https://github.com/MakcRe/KuGouMusicApi>
//!
//! 不同版本、不同接口返回的字段名并不统一（`FileHash` / `hash` / `Hash` 等），
//! 所以搜索与播放链接的响应都按 `serde_json::Value` 处理，
//! 由本模块按优先级尝试各个别名，缺失字段取默认值，从不报错。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::candidate::CandidateRecord;

// =================================================================
// 搜索接口 (`/search`, `/search/song`, `/cloudsearch`)
// =================================================================

const HASH_KEYS: &[&str] = &["FileHash", "hash", "Hash"];
const SONG_NAME_KEYS: &[&str] = &["FileName", "SongName", "songName", "name", "OriSongName"];
const SINGER_NAME_KEYS: &[&str] = &["SingerName", "singerName", "artist", "artistName"];
const ALBUM_NAME_KEYS: &[&str] = &["AlbumName", "albumName", "album"];
const DURATION_KEYS: &[&str] = &["Duration", "duration"];
const FILE_SIZE_KEYS: &[&str] = &["FileSize", "fileSize", "size"];

/// 按顺序取第一个非空字符串字段。
fn first_str(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

/// 按顺序取第一个正整数字段，兼容字符串形式的数字。
fn first_u64(item: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .filter_map(|v| match v {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .find(|n| *n > 0)
}

/// 把一条搜索结果标准化为 [`CandidateRecord`]。
///
/// 没有 hash 或没有可用歌曲名的条目返回 `None`。
pub fn normalize_candidate(item: &Value) -> Option<CandidateRecord> {
    let source_id = first_str(item, HASH_KEYS)?;
    let song_name = first_str(item, SONG_NAME_KEYS)?;

    Some(CandidateRecord {
        source_id,
        song_name,
        singer_name: first_str(item, SINGER_NAME_KEYS).unwrap_or_default(),
        album_name: first_str(item, ALBUM_NAME_KEYS),
        duration: first_u64(item, DURATION_KEYS),
        file_size: first_u64(item, FILE_SIZE_KEYS),
    })
}

/// 判断一个搜索响应是否可用。
pub fn is_usable_search_response(body: &Value) -> bool {
    body.get("status").and_then(Value::as_i64) == Some(1)
        || body.get("code").and_then(Value::as_i64) == Some(0)
        || body.get("data").is_some_and(|d| !d.is_null())
}

/// 从搜索响应中取出歌曲列表。
///
/// 依次尝试 `data.lists`、`data.songs`、`data`（数组）、`songs`、`lists`。
pub fn extract_song_list(body: &Value) -> &[Value] {
    let data = body.get("data");
    let candidates = [
        data.and_then(|d| d.get("lists")),
        data.and_then(|d| d.get("songs")),
        data,
        body.get("songs"),
        body.get("lists"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// 从搜索响应中解析出全部有效候选，保持上游顺序。
pub fn parse_search_response(body: &Value) -> Vec<CandidateRecord> {
    extract_song_list(body)
        .iter()
        .filter_map(normalize_candidate)
        .collect()
}

// =================================================================
// 播放链接接口 (`/song/url`, `/song/url/new`)
// =================================================================

/// 播放链接接口的解析结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayUrlOutcome {
    /// 拿到了可下载的链接。
    Available(String),
    /// `status == 2`：需要付费或有版权限制。
    Paid,
    /// `status == 0`：歌曲不存在或已下架。
    Removed,
    /// 响应里没有可用链接，可以尝试下一个接口。
    Missing,
}

fn non_empty(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 解析播放链接接口的响应。
///
/// `status == 1` 时依次尝试 `url`（字符串或数组）、`backupUrl[0]`、
/// `data.play_url`、`data.url`、`play_url`。
pub fn extract_play_url(body: &Value) -> PlayUrlOutcome {
    match body.get("status").and_then(Value::as_i64) {
        Some(2) => return PlayUrlOutcome::Paid,
        Some(0) => return PlayUrlOutcome::Removed,
        Some(1) => {}
        _ => return PlayUrlOutcome::Missing,
    }

    let url = match body.get("url") {
        Some(Value::Array(urls)) => non_empty(urls.first()),
        other => non_empty(other),
    };
    let data = body.get("data");

    url.or_else(|| {
        body.get("backupUrl")
            .and_then(Value::as_array)
            .and_then(|urls| non_empty(urls.first()))
    })
    .or_else(|| non_empty(data.and_then(|d| d.get("play_url"))))
    .or_else(|| non_empty(data.and_then(|d| d.get("url"))))
    .or_else(|| non_empty(body.get("play_url")))
    .map_or(PlayUrlOutcome::Missing, PlayUrlOutcome::Available)
}

// =================================================================
// 登录状态文件 (`kugou_auth.json`)
// =================================================================

/// 默认的登录有效期：7 天（毫秒）。
pub const DEFAULT_AUTH_EXPIRES_IN_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// 持久化的酷狗登录状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KugouAuthRecord {
    /// 用户 ID。
    pub user_id: String,
    /// 登录令牌。
    pub token: String,
    /// 请求时附带的 Cookie 字符串。
    pub cookies: String,
    /// 登录时间，Unix 毫秒时间戳。
    pub login_time: i64,
    /// 有效期（毫秒）。
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    DEFAULT_AUTH_EXPIRES_IN_MS
}

impl KugouAuthRecord {
    /// 在给定时间（Unix 毫秒）是否已过期。
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.login_time) > self.expires_in
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_normalize_candidate_field_aliases() {
        let item = json!({
            "FileHash": "ABC123",
            "SongName": "十年",
            "SingerName": "陈奕迅",
            "AlbumName": "黑·白·灰",
            "Duration": 205,
            "FileSize": "3290112"
        });
        let c = normalize_candidate(&item).unwrap();
        assert_eq!(c.source_id, "ABC123");
        assert_eq!(c.song_name, "十年");
        assert_eq!(c.singer_name, "陈奕迅");
        assert_eq!(c.album_name.as_deref(), Some("黑·白·灰"));
        assert_eq!(c.duration, Some(205));
        assert_eq!(c.file_size, Some(3290112));

        let lower = json!({ "hash": "h", "name": "Song", "artist": "Someone", "album": "" });
        let c = normalize_candidate(&lower).unwrap();
        assert_eq!(c.song_name, "Song");
        assert_eq!(c.singer_name, "Someone");
        assert_eq!(c.album_name, None);
        assert_eq!(c.duration, None);
    }

    #[test]
    fn test_normalize_candidate_alias_priority() {
        let item = json!({ "Hash": "late", "hash": "early", "OriSongName": "ori", "FileName": "file" });
        let c = normalize_candidate(&item).unwrap();
        assert_eq!(c.source_id, "early");
        assert_eq!(c.song_name, "file");
    }

    #[test]
    fn test_normalize_candidate_drops_invalid() {
        assert!(normalize_candidate(&json!({ "SongName": "无 hash" })).is_none());
        assert!(normalize_candidate(&json!({ "FileHash": "h", "SongName": "  " })).is_none());
        assert!(normalize_candidate(&json!("not an object")).is_none());
    }

    #[test]
    fn test_extract_song_list_paths() {
        let nested = json!({ "status": 1, "data": { "lists": [{ "FileHash": "a", "SongName": "x" }] } });
        assert_eq!(extract_song_list(&nested).len(), 1);

        let songs = json!({ "data": { "songs": [{}, {}] } });
        assert_eq!(extract_song_list(&songs).len(), 2);

        let flat = json!({ "data": [{}, {}, {}] });
        assert_eq!(extract_song_list(&flat).len(), 3);

        let top = json!({ "lists": [{}] });
        assert_eq!(extract_song_list(&top).len(), 1);

        assert!(extract_song_list(&json!({ "data": { "total": 0 } })).is_empty());
    }

    #[test]
    fn test_parse_search_response_keeps_order_and_filters() {
        let body = json!({
            "status": 1,
            "data": { "lists": [
                { "FileHash": "1", "SongName": "十年", "SingerName": "陈奕迅" },
                { "SongName": "缺少 hash" },
                { "FileHash": "2", "SongName": "十年 (Live)", "SingerName": "陈奕迅" }
            ]}
        });
        let ids: Vec<_> = parse_search_response(&body)
            .into_iter()
            .map(|c| c.source_id)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_is_usable_search_response() {
        assert!(is_usable_search_response(&json!({ "status": 1 })));
        assert!(is_usable_search_response(&json!({ "code": 0 })));
        assert!(is_usable_search_response(&json!({ "data": [] })));
        assert!(!is_usable_search_response(&json!({ "status": 0, "data": null })));
    }

    #[test]
    fn test_extract_play_url_statuses() {
        assert_eq!(extract_play_url(&json!({ "status": 2 })), PlayUrlOutcome::Paid);
        assert_eq!(extract_play_url(&json!({ "status": 0 })), PlayUrlOutcome::Removed);
        assert_eq!(extract_play_url(&json!({ "error": "x" })), PlayUrlOutcome::Missing);
        assert_eq!(extract_play_url(&json!({ "status": 1 })), PlayUrlOutcome::Missing);
    }

    #[test]
    fn test_extract_play_url_field_order() {
        assert_eq!(
            extract_play_url(&json!({ "status": 1, "url": ["http://a/1.mp3", "http://a/2.mp3"] })),
            PlayUrlOutcome::Available("http://a/1.mp3".into())
        );
        assert_eq!(
            extract_play_url(&json!({ "status": 1, "url": "http://b.mp3", "play_url": "http://c.mp3" })),
            PlayUrlOutcome::Available("http://b.mp3".into())
        );
        assert_eq!(
            extract_play_url(&json!({ "status": 1, "url": [], "backupUrl": ["http://backup.mp3"] })),
            PlayUrlOutcome::Available("http://backup.mp3".into())
        );
        assert_eq!(
            extract_play_url(&json!({ "status": 1, "data": { "url": "http://d.mp3" } })),
            PlayUrlOutcome::Available("http://d.mp3".into())
        );
        assert_eq!(
            extract_play_url(&json!({ "status": 1, "play_url": "http://e.mp3" })),
            PlayUrlOutcome::Available("http://e.mp3".into())
        );
    }

    #[test]
    fn test_auth_record_expiry_and_format() {
        let record: KugouAuthRecord = serde_json::from_value(json!({
            "userId": "42",
            "token": "t",
            "cookies": "token=t; userid=42",
            "loginTime": 1_000
        }))
        .unwrap();
        assert_eq!(record.expires_in, DEFAULT_AUTH_EXPIRES_IN_MS);
        assert!(!record.is_expired_at(1_000 + DEFAULT_AUTH_EXPIRES_IN_MS));
        assert!(record.is_expired_at(1_001 + DEFAULT_AUTH_EXPIRES_IN_MS));
    }
}
