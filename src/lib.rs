#![warn(missing_docs)]

//! # Audio Fetcher RS
//!
//! 一个从多个音源搜索、下载歌曲并修正标签元数据的 Rust 库。
//!
//! ## 主要功能
//!
//! - **多音源下载**: 依次尝试 YouTube Music（通过 `yt-dlp`）和酷狗音乐（通过本地 KuGouMusicApi），
//!   对暂时性失败原地重试，对付费或下架的歌曲直接换下一个音源。
//! - **模糊匹配**: 对酷狗返回的杂乱搜索结果打分排序，并在多个查询变体之间逐步放宽。
//! - **标签修正**: 比较 Spotify 给出的规范元数据与下载时发现的原文元数据，给出修正建议。
//! - **批量下载**: 按顺序处理一组歌曲链接，写入标签并统计结果。
//!
//! ## 下载单首歌曲
//!
//! ```rust,no_run
//! use audio_fetcher_rs::{AudioDownloader, config::DownloaderConfig, model::download::DownloadOptions};
//!
//! async {
//!     let config = DownloaderConfig::load().unwrap();
//!     let downloader = AudioDownloader::from_config(&config).await.unwrap();
//!     // 目标目录由调用方负责创建
//!     tokio::fs::create_dir_all("./downloads").await.unwrap();
//!
//!     let result = downloader
//!         .download_audio("陈奕迅", "十年", "./downloads/陈奕迅 - 十年.mp3".as_ref(), &DownloadOptions::default())
//!         .await;
//!     if result.success {
//!         println!("下载成功，来源: {:?}", result.provider_display_name);
//!     } else {
//!         eprintln!("下载失败: {:?}", result.error);
//!     }
//! };
//! ```
pub mod batch;
pub mod config;
pub mod error;
pub mod metadata;
pub mod model;
pub mod policy;
pub mod providers;
pub mod reconcile;
pub mod retrieval;
pub mod search;
pub mod tagging;

#[cfg(test)]
mod test_support;

use std::{path::Path, sync::Arc};

use tracing::{info, instrument, warn};

pub use crate::{
    error::{DownloaderError, FailureKind, Result},
    model::download::{DownloadOptions, DownloadResult, ProviderId},
};

use crate::{
    config::DownloaderConfig,
    model::{
        download::AttemptRecord,
        track::{DiscoveredMetadata, WantedTrack},
    },
    providers::{
        AudioSource,
        kugou::{KugouClient, auth::FileKugouAuth, source::KugouSource},
        ytdlp::YtDlpSource,
    },
};

// ==========================================================
//  顶层 API
// ==========================================================

/// 下载调度器，按策略依次尝试各个音源。
///
/// 这是与本库交互的主要入口点。
pub struct AudioDownloader {
    primary: Box<dyn AudioSource>,
    secondary: Option<Box<dyn AudioSource>>,
}

impl AudioDownloader {
    /// 使用给定的音源创建调度器。
    ///
    /// `secondary` 为 `None` 表示地区曲库不可用，调度时会被跳过。
    pub fn new(primary: Box<dyn AudioSource>, secondary: Option<Box<dyn AudioSource>>) -> Self {
        Self { primary, secondary }
    }

    /// 根据配置创建调度器。
    ///
    /// 酷狗只有在配置启用、已登录并且本地 API 服务可用时才会加入。
    pub async fn from_config(config: &DownloaderConfig) -> Result<Self> {
        let primary = YtDlpSource::new(&config.ytdlp_path, config.ytdlp_cookies.clone());

        let secondary: Option<Box<dyn AudioSource>> = if config.kugou_enabled {
            let auth = Arc::new(FileKugouAuth::from_config_dir()?);
            let client = KugouClient::new(config.kugou_api_url.clone(), auth)?;
            if !client.is_logged_in().await {
                info!("酷狗未登录，仅使用 YouTube Music。");
                None
            } else if !client.is_api_running().await {
                warn!("KuGouMusicApi 服务不可用: {}", config.kugou_api_url);
                None
            } else {
                let source =
                    KugouSource::new(Arc::new(client), config.allow_low_confidence_fallback)?;
                Some(Box::new(source))
            }
        } else {
            None
        };

        Ok(Self::new(Box::new(primary), secondary))
    }

    /// 地区曲库是否可用。
    pub fn secondary_available(&self) -> bool {
        self.secondary.is_some()
    }

    fn source(&self, id: ProviderId) -> Option<&dyn AudioSource> {
        if self.primary.id() == id {
            return Some(self.primary.as_ref());
        }
        self.secondary
            .as_deref()
            .filter(|source| source.id() == id)
    }

    /// 下载一首歌到 `output_path`。
    ///
    /// 按 [`policy::provider_order`] 给出的顺序尝试音源，每个音源最多尝试
    /// `max_retries_per_provider` 次。付费或下架的歌曲不会在同一个音源上重试。
    ///
    /// 这个方法从不返回错误，所有失败信息都在 [`DownloadResult`] 中。
    #[instrument(skip(self, output_path, options))]
    pub async fn download_audio(
        &self,
        artist: &str,
        title: &str,
        output_path: &Path,
        options: &DownloadOptions,
    ) -> DownloadResult {
        let wanted = WantedTrack::new(artist, title);
        let secondary_enabled =
            self.secondary_available() && options.secondary_enabled.unwrap_or(true);
        let order = policy::provider_order(options.preferred_provider, secondary_enabled);

        let mut attempts = Vec::new();
        let mut last_error: Option<String> = None;
        let mut last_discovered: Option<DiscoveredMetadata> = None;

        for provider in order {
            let Some(source) = self.source(provider) else {
                warn!("音源 {} 未配置，跳过。", provider);
                continue;
            };

            for attempt in 1..=options.max_retries_per_provider {
                info!(
                    "正在尝试 {} (第 {}/{} 次)",
                    source.display_name(),
                    attempt,
                    options.max_retries_per_provider
                );
                let result = source.fetch(&wanted, output_path).await;

                match result.outcome {
                    Ok(()) => {
                        attempts.push(AttemptRecord {
                            provider,
                            attempt,
                            failure: None,
                            message: None,
                        });
                        info!("下载成功，来源: {}", source.display_name());
                        return DownloadResult {
                            success: true,
                            provider,
                            provider_display_name: Some(source.display_name().to_string()),
                            error: None,
                            failure: None,
                            discovered_metadata: result.discovered,
                            attempts,
                        };
                    }
                    Err(e) => {
                        let kind = e.kind();
                        let message = e.to_string();
                        warn!("{} 第 {} 次尝试失败: {}", source.display_name(), attempt, message);

                        attempts.push(AttemptRecord {
                            provider,
                            attempt,
                            failure: Some(kind),
                            message: Some(message.clone()),
                        });
                        last_error = Some(message);
                        if result.discovered.is_some() {
                            last_discovered = result.discovered;
                        }

                        if !kind.is_retryable() {
                            info!("{} 无法获取该歌曲，换下一个音源。", source.display_name());
                            break;
                        }
                        if attempt < options.max_retries_per_provider {
                            tokio::time::sleep(options.retry_delay * attempt).await;
                        }
                    }
                }
            }
        }

        warn!("所有音源均失败: {} - {}", artist, title);
        DownloadResult {
            success: false,
            provider: options.preferred_provider.unwrap_or(ProviderId::YouTube),
            provider_display_name: None,
            error: Some(last_error.unwrap_or_else(|| "没有可用的音源".to_string())),
            failure: Some(FailureKind::Exhausted),
            discovered_metadata: last_discovered,
            attempts,
        }
    }
}
