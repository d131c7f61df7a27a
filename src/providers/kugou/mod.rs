//! 实现了与酷狗音乐进行交互的地区曲库音源。
//!
//! 所有请求都经过本地运行的 KuGouMusicApi 服务，
//! API 来源于 https://github.com/MakcRe/KuGouMusicApi
//!
//! # 使用流程
//!
//! 1. 使用 `search` 搜索歌曲，得到标准化后的候选列表，每个候选带有文件 `hash`。
//! 2. 将选中候选的 `hash` 传给 `resolve_play_url`，得到可下载的音频链接。
//! 3. 用 [`crate::retrieval::Retriever`] 下载音频。
//!
//! 第 1 步的关键词放宽与候选筛选由 [`source::KugouSource`] 负责。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{DownloaderError, Result},
    model::candidate::CandidateRecord,
    search::CatalogSearch,
};

pub mod auth;
pub mod models;
pub mod source;

use auth::KugouAuth;
use models::PlayUrlOutcome;

const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const SEARCH_ENDPOINTS: &[&str] = &["/search", "/search/song", "/cloudsearch"];
const PLAY_URL_ENDPOINTS: &[&str] = &["/song/url", "/song/url/new"];
const SEARCH_PAGE_SIZE: &str = "20";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// 地区曲库需要提供的全部能力。
#[async_trait]
pub trait KugouCatalog: CatalogSearch {
    /// 把文件 hash 解析为可下载的链接。
    ///
    /// 付费、地区限制或已下架时返回 `AccessRestricted`。
    async fn resolve_play_url(&self, hash: &str) -> Result<String>;
}

/// 本地 KuGouMusicApi 服务的客户端。
#[derive(Clone)]
pub struct KugouClient {
    base_url: String,
    http_client: Client,
    auth: Arc<dyn KugouAuth>,
}

impl std::fmt::Debug for KugouClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KugouClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl KugouClient {
    /// 创建客户端。`base_url` 末尾的 `/` 会被去掉。
    pub fn new(base_url: impl Into<String>, auth: Arc<dyn KugouAuth>) -> Result<Self> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            http_client,
            auth,
        })
    }

    /// 本地 API 服务是否在运行。
    pub async fn is_api_running(&self) -> bool {
        let result = self
            .http_client
            .get(format!("{}/", self.base_url))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(_) => true,
            Err(e) => {
                debug!("酷狗 API 服务不可用: {}", e);
                false
            }
        }
    }

    /// 是否已登录。
    pub async fn is_logged_in(&self) -> bool {
        self.auth.is_logged_in().await
    }

    async fn require_cookies(&self) -> Result<String> {
        self.auth
            .cookies()
            .await
            .ok_or_else(|| DownloaderError::NotLoggedIn("酷狗音乐".to_string()))
    }

    async fn execute_get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        cookies: &str,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http_client
            .get(&url)
            .query(params)
            .header(header::COOKIE, cookies)
            .header(header::USER_AGENT, DESKTOP_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        tracing::trace!(
            url = url,
            response.body = %response_text,
            "原始 JSON 响应"
        );

        if !status.is_success() {
            return Err(DownloaderError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        Ok(serde_json::from_str(&response_text)?)
    }
}

#[async_trait]
impl CatalogSearch for KugouClient {
    #[instrument(skip(self))]
    async fn search(&self, keyword: &str) -> Result<Vec<CandidateRecord>> {
        let cookies = self.require_cookies().await?;
        let params = [
            ("keywords", keyword),
            ("keyword", keyword),
            ("page", "1"),
            ("pagesize", SEARCH_PAGE_SIZE),
            ("limit", SEARCH_PAGE_SIZE),
        ];

        let mut body = None;
        for endpoint in SEARCH_ENDPOINTS {
            debug!("尝试搜索接口: {}", endpoint);
            match self.execute_get(endpoint, &params, &cookies).await {
                Ok(value) if models::is_usable_search_response(&value) => {
                    debug!("成功使用接口: {}", endpoint);
                    body = Some(value);
                    break;
                }
                Ok(_) => debug!("接口 {} 返回了不可用的响应", endpoint),
                Err(e) => debug!("接口 {} 失败: {}", endpoint, e),
            }
        }

        let Some(body) = body else {
            return Err(DownloaderError::ApiError("所有搜索接口".to_string()));
        };

        let candidates = models::parse_search_response(&body);
        if candidates.is_empty() {
            return Err(DownloaderError::NotFound(keyword.to_string()));
        }

        for (index, c) in candidates.iter().enumerate() {
            debug!("  {}. {} - {} ({})", index + 1, c.singer_name, c.song_name, c.source_id);
        }
        Ok(candidates)
    }
}

#[async_trait]
impl KugouCatalog for KugouClient {
    #[instrument(skip(self))]
    async fn resolve_play_url(&self, hash: &str) -> Result<String> {
        let cookies = self.require_cookies().await?;

        let mut last_error = None;
        for endpoint in PLAY_URL_ENDPOINTS {
            let body = match self.execute_get(endpoint, &[("hash", hash)], &cookies).await {
                Ok(body) => body,
                Err(e) => {
                    debug!("接口 {} 失败: {}", endpoint, e);
                    last_error = Some(e);
                    continue;
                }
            };
            match models::extract_play_url(&body) {
                PlayUrlOutcome::Available(url) => {
                    info!("成功获取下载链接 ({})", endpoint);
                    return Ok(url);
                }
                PlayUrlOutcome::Paid => {
                    warn!("歌曲需要付费或有版权限制，跳过");
                    return Err(DownloaderError::AccessRestricted(format!(
                        "{hash}: 需要付费或有版权限制"
                    )));
                }
                PlayUrlOutcome::Removed => {
                    warn!("歌曲不存在或已下架，跳过");
                    return Err(DownloaderError::AccessRestricted(format!(
                        "{hash}: 不存在或已下架"
                    )));
                }
                PlayUrlOutcome::Missing => {
                    debug!("接口 {} 未返回有效链接", endpoint);
                }
            }
        }

        // 接口本身出错时保留原错误，以便调度器重试
        Err(last_error.unwrap_or_else(|| {
            DownloaderError::AccessRestricted(format!("{hash}: 所有接口都未能获取到下载链接"))
        }))
    }
}
