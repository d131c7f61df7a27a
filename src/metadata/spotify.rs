//! Spotify Web API 元数据提供商（Client Credentials 授权）。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{
    error::{DownloaderError, Result},
    metadata::{
        CollectionRef, MetadataProvider, TrackCollection, parse_collection_ref, parse_track_id,
    },
    model::track::{CoverImage, TrackMeta},
};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// 令牌提前这么久视为过期。
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

// =================================================================
// 接口响应
// =================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TrackResponse {
    name: String,
    #[serde(default)]
    artists: Vec<NamedObject>,
    album: Option<AlbumObject>,
    external_ids: Option<ExternalIds>,
    track_number: Option<u32>,
    disc_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: String,
    release_date: Option<String>,
    total_tracks: Option<u32>,
    #[serde(default)]
    images: Vec<ImageObject>,
}

#[derive(Debug, Deserialize)]
struct ImageObject {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    isrc: Option<String>,
}

/// 歌单与专辑共用的外层结构，`tracks` 是第一页。
#[derive(Debug, Deserialize)]
struct CollectionResponse {
    name: String,
    tracks: Page,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<PageItem>,
    next: Option<String>,
}

/// 歌单条目把歌曲包在 `track` 里（可能为 null），专辑条目本身就是歌曲。
#[derive(Debug, Deserialize)]
struct PageItem {
    #[serde(default)]
    track: Option<TrackLink>,
    #[serde(flatten)]
    link: TrackLink,
}

#[derive(Debug, Default, Deserialize)]
struct TrackLink {
    id: Option<String>,
    external_urls: Option<ExternalUrls>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

impl PageItem {
    fn into_track_ref(self) -> Option<String> {
        let link = self.track.unwrap_or(self.link);
        link.external_urls
            .and_then(|urls| urls.spotify)
            .or_else(|| link.id.map(|id| format!("spotify:track:{id}")))
    }
}

fn collect_track_refs(page: Page, tracks: &mut Vec<String>) -> Option<String> {
    tracks.extend(page.items.into_iter().filter_map(PageItem::into_track_ref));
    page.next
}

impl From<TrackResponse> for TrackMeta {
    fn from(track: TrackResponse) -> Self {
        let artist = track
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let (album, release_date, total_tracks, images) = match track.album {
            Some(album) => (
                album.name,
                album.release_date,
                album.total_tracks,
                album
                    .images
                    .into_iter()
                    .map(|i| CoverImage {
                        url: i.url,
                        width: i.width,
                        height: i.height,
                    })
                    .collect(),
            ),
            None => (String::new(), None, None, Vec::new()),
        };

        Self {
            title: track.name,
            artist,
            album,
            isrc: track.external_ids.and_then(|ids| ids.isrc),
            track_number: track.track_number,
            total_tracks,
            disc_number: track.disc_number,
            release_date,
            images,
        }
    }
}

// =================================================================
// 客户端
// =================================================================

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Spotify 客户端，访问令牌在有效期内复用。
#[derive(Debug)]
pub struct SpotifyClient {
    http_client: Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    /// 使用官方地址创建客户端。
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        Self::with_endpoints(client_id, client_secret, SPOTIFY_API_BASE, SPOTIFY_TOKEN_URL)
    }

    /// 使用自定义地址创建客户端。
    pub fn with_endpoints(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        api_base: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Result<Self> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    /// 获取访问令牌，缓存未过期时直接返回。
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        debug!("正在获取 Spotify 访问令牌");
        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloaderError::NotLoggedIn(format!(
                "Spotify 授权失败 (HTTP {})",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        info!("已获取 Spotify 访问令牌");
        Ok(token.access_token)
    }

    /// 带令牌 GET 一个接口并解析 JSON，`not_found` 是 404 时报告的对象。
    async fn get_json<T: DeserializeOwned>(&self, url: &str, not_found: &str) -> Result<T> {
        let token = self.access_token().await?;
        let response = self.http_client.get(url).bearer_auth(token).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(DownloaderError::NotFound(not_found.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(DownloaderError::RateLimited("Spotify".to_string()));
            }
            s if !s.is_success() => {
                return Err(DownloaderError::HttpStatus {
                    status: s.as_u16(),
                    url: url.to_string(),
                });
            }
            _ => {}
        }

        let body = response.text().await?;
        tracing::trace!(url = url, response.body = %body, "原始 JSON 响应");
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MetadataProvider for SpotifyClient {
    #[instrument(skip(self))]
    async fn get_track_meta(&self, track_ref: &str) -> Result<TrackMeta> {
        let track_id = parse_track_id(track_ref)
            .ok_or_else(|| DownloaderError::NotFound(format!("无效的歌曲链接: {track_ref}")))?;
        let url = format!("{}/tracks/{}", self.api_base, track_id);
        let track: TrackResponse = self.get_json(&url, &track_id).await?;
        Ok(track.into())
    }

    #[instrument(skip(self))]
    async fn get_collection_tracks(&self, collection_ref: &str) -> Result<TrackCollection> {
        let (kind, id) = match parse_collection_ref(collection_ref) {
            Some(CollectionRef::Playlist(id)) => ("playlists", id),
            Some(CollectionRef::Album(id)) => ("albums", id),
            None => {
                return Err(DownloaderError::NotFound(format!(
                    "无效的歌单或专辑链接: {collection_ref}"
                )));
            }
        };

        let url = format!("{}/{}/{}", self.api_base, kind, id);
        let collection: CollectionResponse = self.get_json(&url, &id).await?;
        let mut tracks = Vec::new();
        let mut next = collect_track_refs(collection.tracks, &mut tracks);
        while let Some(next_url) = next {
            debug!("正在获取下一页: {}", next_url);
            let page: Page = self.get_json(&next_url, &id).await?;
            next = collect_track_refs(page, &mut tracks);
        }

        info!("{}「{}」共 {} 首", kind, collection.name, tracks.len());
        Ok(TrackCollection {
            name: collection.name,
            tracks,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{StubResponse, spawn_stub};

    fn track_json() -> serde_json::Value {
        json!({
            "name": "Ten Years",
            "artists": [{ "name": "Eason Chan" }, { "name": "Guest" }],
            "album": {
                "name": "Black, White & Grey",
                "release_date": "2003-04-15",
                "total_tracks": 10,
                "images": [{ "url": "http://img/640.jpg", "width": 640, "height": 640 }]
            },
            "external_ids": { "isrc": "HKA000300001" },
            "track_number": 3,
            "disc_number": 1
        })
    }

    #[test]
    fn test_track_response_conversion() {
        let track: TrackResponse = serde_json::from_value(track_json()).unwrap();
        let meta = TrackMeta::from(track);
        assert_eq!(meta.artist, "Eason Chan, Guest");
        assert_eq!(meta.album, "Black, White & Grey");
        assert_eq!(meta.isrc.as_deref(), Some("HKA000300001"));
        assert_eq!(meta.total_tracks, Some(10));
        assert_eq!(meta.release_year(), Some(2003));
        assert_eq!(meta.images[0].width, Some(640));
    }

    #[tokio::test]
    async fn test_token_is_cached_between_calls() {
        let (base, seen) = spawn_stub(|req| match req.path() {
            "/token" => StubResponse::json(json!({ "access_token": "tok", "expires_in": 3600 })),
            "/v1/tracks/4uLU6hMCjMI75M1A2tKUQC" => StubResponse::json(track_json()),
            _ => StubResponse::status(404),
        })
        .await;
        let client = SpotifyClient::with_endpoints(
            "id",
            "secret",
            format!("{base}/v1"),
            format!("{base}/token"),
        )
        .unwrap();

        let meta = client
            .get_track_meta("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC")
            .await
            .unwrap();
        assert_eq!(meta.title, "Ten Years");
        client
            .get_track_meta("spotify:track:4uLU6hMCjMI75M1A2tKUQC")
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        let token_requests: Vec<_> = seen.iter().filter(|r| r.path() == "/token").collect();
        assert_eq!(token_requests.len(), 1);
        assert_eq!(token_requests[0].method, "POST");
        assert!(token_requests[0].body.contains("grant_type=client_credentials"));
        assert!(token_requests[0].header("authorization").unwrap().starts_with("Basic "));
        assert_eq!(seen.last().unwrap().header("authorization"), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_playlist_pages_are_followed_and_null_tracks_skipped() {
        let (base, seen) = spawn_stub(|req| match req.target.as_str() {
            "/token" => StubResponse::json(json!({ "access_token": "tok" })),
            "/v1/playlists/pl1" => StubResponse::json(json!({
                "name": "周末",
                "tracks": {
                    "items": [
                        { "track": { "id": "a1", "external_urls": { "spotify": "https://open.spotify.com/track/a1" } } },
                        { "track": null },
                        { "track": { "id": "a2" } }
                    ],
                    // 下一页是绝对地址
                    "next": format!("http://{}/v1/playlists/pl1/tracks?offset=3", req.header("host").unwrap())
                }
            })),
            "/v1/playlists/pl1/tracks?offset=3" => StubResponse::json(json!({
                "items": [{ "track": { "id": "a3", "external_urls": { "spotify": "https://open.spotify.com/track/a3" } } }],
                "next": null
            })),
            _ => StubResponse::status(404),
        })
        .await;
        let client = SpotifyClient::with_endpoints(
            "id",
            "secret",
            format!("{base}/v1"),
            format!("{base}/token"),
        )
        .unwrap();

        let collection = client
            .get_collection_tracks("https://open.spotify.com/playlist/pl1?si=x")
            .await
            .unwrap();

        assert_eq!(collection.name, "周末");
        assert_eq!(
            collection.tracks,
            vec![
                "https://open.spotify.com/track/a1",
                "spotify:track:a2",
                "https://open.spotify.com/track/a3",
            ]
        );
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.iter().filter(|r| r.path() == "/token").count(), 1);
        assert!(
            seen.iter()
                .filter(|r| r.path() != "/token")
                .all(|r| r.header("authorization") == Some("Bearer tok"))
        );
    }

    #[tokio::test]
    async fn test_album_tracks_and_missing_album() {
        let (base, _) = spawn_stub(|req| match req.path() {
            "/token" => StubResponse::json(json!({ "access_token": "tok" })),
            "/v1/albums/al1" => StubResponse::json(json!({
                "name": "黑·白·灰",
                "tracks": {
                    "items": [
                        { "id": "b1", "external_urls": { "spotify": "https://open.spotify.com/track/b1" } },
                        { "id": "b2" }
                    ],
                    "next": null
                }
            })),
            _ => StubResponse::status(404),
        })
        .await;
        let client = SpotifyClient::with_endpoints(
            "id",
            "secret",
            format!("{base}/v1"),
            format!("{base}/token"),
        )
        .unwrap();

        let collection = client
            .get_collection_tracks("spotify:album:al1")
            .await
            .unwrap();
        assert_eq!(collection.name, "黑·白·灰");
        assert_eq!(
            collection.tracks,
            vec!["https://open.spotify.com/track/b1", "spotify:track:b2"]
        );

        let err = client
            .get_collection_tracks("https://open.spotify.com/album/gone")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloaderError::NotFound(_)));
        let err = client
            .get_collection_tracks("https://open.spotify.com/track/t1")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloaderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_track_is_not_found() {
        let (base, _) = spawn_stub(|req| match req.path() {
            "/token" => StubResponse::json(json!({ "access_token": "tok" })),
            _ => StubResponse::status(404),
        })
        .await;
        let client = SpotifyClient::with_endpoints("id", "secret", base.clone(), format!("{base}/token"))
            .unwrap();

        let err = client.get_track_meta("missing").await.unwrap_err();
        assert!(matches!(err, DownloaderError::NotFound(_)));
    }
}
