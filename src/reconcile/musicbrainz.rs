//! MusicBrainz 参考曲库。
//!
//! See: https://musicbrainz.org/doc/MusicBrainz_API
//!
//! MusicBrainz 要求请求带有 User-Agent。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{
    error::{DownloaderError, Result},
    reconcile::{ReferenceCatalog, ReferenceRecord, ReferenceRelease},
};

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = concat!(
    "audio-fetcher-rs/",
    env!("CARGO_PKG_VERSION"),
    " ( https://musicbrainz.org/doc/MusicBrainz_API )"
);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =================================================================
// `/recording` 搜索接口的响应
// =================================================================

#[derive(Debug, Deserialize)]
struct RecordingSearchResponse {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Recording {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    /// 署名（可能与艺术家正式名称不同）
    name: Option<String>,
    artist: Option<Artist>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    title: String,
    status: Option<String>,
}

impl From<Recording> for ReferenceRecord {
    fn from(recording: Recording) -> Self {
        Self {
            title: recording.title,
            artist_credits: recording
                .artist_credit
                .into_iter()
                .filter_map(|credit| {
                    credit
                        .name
                        .filter(|n| !n.is_empty())
                        .or_else(|| credit.artist.and_then(|a| a.name))
                })
                .collect(),
            releases: recording
                .releases
                .into_iter()
                .map(|r| ReferenceRelease {
                    title: r.title,
                    status: r.status,
                })
                .collect(),
        }
    }
}

/// 构造按艺术家和标题搜索的 Lucene 查询。
fn artist_title_query(artist: &str, title: &str) -> String {
    let escape = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "artist:\"{}\" AND recording:\"{}\"",
        escape(artist),
        escape(title)
    )
}

/// MusicBrainz API 客户端。
#[derive(Debug, Clone)]
pub struct MusicBrainzClient {
    http_client: Client,
    base_url: String,
}

impl MusicBrainzClient {
    /// 使用官方地址创建客户端。
    pub fn new() -> Result<Self> {
        Self::with_base_url(MUSICBRAINZ_BASE_URL)
    }

    /// 使用自定义地址创建客户端（镜像或测试）。
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// 请求 `/recording` 并返回第一条录音。
    async fn first_recording(&self, params: &[(&str, &str)]) -> Result<Option<ReferenceRecord>> {
        let url = format!("{}/recording", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(params)
            .query(&[("fmt", "json")])
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(DownloaderError::RateLimited("MusicBrainz".to_string()));
        }
        if !status.is_success() {
            return Err(DownloaderError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        tracing::trace!(url = url, response.body = %body, "原始 JSON 响应");

        let parsed: RecordingSearchResponse = serde_json::from_str(&body)?;
        Ok(parsed.recordings.into_iter().next().map(ReferenceRecord::from))
    }
}

#[async_trait]
impl ReferenceCatalog for MusicBrainzClient {
    #[instrument(skip(self))]
    async fn find_by_isrc(&self, isrc: &str) -> Result<Option<ReferenceRecord>> {
        // 先用 isrc 过滤参数，失败或为空时退回到 query 搜索
        match self.first_recording(&[("isrc", isrc)]).await {
            Ok(Some(record)) => return Ok(Some(record)),
            Ok(None) => debug!("isrc 参数没有结果，改用搜索"),
            Err(e) => debug!("isrc 参数查询失败: {}，改用搜索", e),
        }
        let query = format!("isrc:{isrc}");
        self.first_recording(&[("query", query.as_str())]).await
    }

    #[instrument(skip(self))]
    async fn find_by_artist_title(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<ReferenceRecord>> {
        let query = artist_title_query(artist, title);
        self.first_recording(&[("query", query.as_str())]).await
    }
}
