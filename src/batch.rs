//! 批量下载：逐首获取元数据、下载、修正并写入标签。

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    AudioDownloader,
    config::DownloaderConfig,
    error::{DownloaderError, Result},
    metadata::{MetadataProvider, TrackCollection, spotify::SpotifyClient},
    model::{
        download::DownloadOptions,
        track::{TagSet, TrackMeta},
    },
    reconcile::{self, ReferenceCatalog, musicbrainz::MusicBrainzClient},
    tagging::{LoftyTagWriter, TagWriter},
};

/// 失败记录文件名，位于下载目录下。
pub const FAILED_TRACKS_FILE_NAME: &str = "failed_tracks.json";

const COVER_TIMEOUT: Duration = Duration::from_secs(15);

/// 一次批量下载的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    /// 歌曲总数。
    pub total: usize,
    /// 下载成功的数量。
    pub success: usize,
    /// 文件已存在而跳过的数量。
    pub skipped: usize,
    /// 失败的数量。
    pub failed: usize,
}

/// `failed_tracks.json` 中的一条记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTrack {
    /// 歌曲链接。
    pub url: String,
    /// 错误信息。
    pub error: String,
    /// RFC 3339 格式的时间。
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackOutcome {
    Downloaded,
    Skipped,
}

/// 去掉文件名中不允许出现的字符。
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect()
}

/// 歌曲对应的音频文件名。
pub fn track_file_name(artist: &str, title: &str) -> String {
    sanitize_file_name(&format!("{artist} - {title}.mp3"))
}

/// 按顺序处理一组歌曲链接的批量下载器。
pub struct BatchRunner {
    downloader: AudioDownloader,
    metadata: Arc<dyn MetadataProvider>,
    tag_writer: Arc<dyn TagWriter>,
    reference: Option<Arc<dyn ReferenceCatalog>>,
    http_client: Client,
    download_dir: PathBuf,
    options: DownloadOptions,
    inter_track_delay: Duration,
    cancel: Arc<AtomicBool>,
}

impl BatchRunner {
    /// 创建批量下载器。
    pub fn new(
        downloader: AudioDownloader,
        metadata: Arc<dyn MetadataProvider>,
        tag_writer: Arc<dyn TagWriter>,
        download_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let http_client = Client::builder().timeout(COVER_TIMEOUT).build()?;
        Ok(Self {
            downloader,
            metadata,
            tag_writer,
            reference: None,
            http_client,
            download_dir: download_dir.into(),
            options: DownloadOptions::default(),
            inter_track_delay: Duration::from_secs(1),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 根据配置创建：Spotify 元数据、MusicBrainz 参考曲库、`lofty` 标签写入。
    ///
    /// 缺少 Spotify 凭据时返回 [`DownloaderError::NotLoggedIn`]。
    pub async fn from_config(config: &DownloaderConfig) -> Result<Self> {
        let (Some(client_id), Some(client_secret)) = (
            config.spotify_client_id.as_deref(),
            config.spotify_client_secret.as_deref(),
        ) else {
            return Err(DownloaderError::NotLoggedIn(
                "缺少 SPOTIFY_CLIENT_ID 或 SPOTIFY_CLIENT_SECRET".to_string(),
            ));
        };

        let downloader = AudioDownloader::from_config(config).await?;
        let metadata = Arc::new(SpotifyClient::new(client_id, client_secret)?);
        let runner = Self::new(
            downloader,
            metadata,
            Arc::new(LoftyTagWriter),
            config.download_dir.clone(),
        )?
        .with_reference(Arc::new(MusicBrainzClient::new()?))
        .with_options(config.download_options())
        .with_inter_track_delay(config.inter_track_delay());
        Ok(runner)
    }

    /// 设置用于修正标签的参考曲库。
    pub fn with_reference(mut self, reference: Arc<dyn ReferenceCatalog>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// 设置每首歌的下载选项。
    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    /// 设置两首歌之间的间隔。
    pub fn with_inter_track_delay(mut self, delay: Duration) -> Self {
        self.inter_track_delay = delay;
        self
    }

    /// 取消标志。置为 `true` 后，批量下载会在开始下一首之前停止。
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// 失败记录文件的路径。
    pub fn failed_tracks_path(&self) -> PathBuf {
        self.download_dir.join(FAILED_TRACKS_FILE_NAME)
    }

    /// 依次处理所有歌曲，单首失败不会中断整个批次。
    pub async fn run(&self, track_refs: &[String]) -> DownloadStats {
        let mut stats = DownloadStats {
            total: track_refs.len(),
            ..Default::default()
        };
        info!("开始批量下载，共 {} 首。", stats.total);

        for (index, track_ref) in track_refs.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("批量下载已取消，剩余 {} 首未处理。", stats.total - index);
                break;
            }
            if index > 0 && !self.inter_track_delay.is_zero() {
                tokio::time::sleep(self.inter_track_delay).await;
            }

            info!("[{}/{}] 正在处理: {}", index + 1, stats.total, track_ref);
            match self.process_track(track_ref).await {
                Ok(TrackOutcome::Downloaded) => stats.success += 1,
                Ok(TrackOutcome::Skipped) => stats.skipped += 1,
                Err(e) => {
                    warn!("[{}/{}] 下载失败: {}", index + 1, stats.total, e);
                    stats.failed += 1;
                    if let Err(log_err) = self.record_failure(track_ref, &e.to_string()).await {
                        warn!("写入失败记录失败: {}", log_err);
                    }
                }
            }
        }

        info!(
            "下载完成！总计 {} 首，成功 {}，跳过 {}，失败 {}",
            stats.total, stats.success, stats.skipped, stats.failed
        );
        stats
    }

    /// 展开歌单或专辑后逐首下载。
    ///
    /// 无法展开或列表为空时返回错误，此时不会下载任何歌曲。
    pub async fn run_collection(&self, collection_ref: &str) -> Result<DownloadStats> {
        let TrackCollection { name, tracks } =
            self.metadata.get_collection_tracks(collection_ref).await?;
        if tracks.is_empty() {
            return Err(DownloaderError::NotFound(format!("歌单或专辑为空: {collection_ref}")));
        }

        info!("歌单名：{}，歌曲数：{}", name, tracks.len());
        Ok(self.run(&tracks).await)
    }

    #[instrument(skip(self))]
    async fn process_track(&self, track_ref: &str) -> Result<TrackOutcome> {
        let meta = self.metadata.get_track_meta(track_ref).await?;

        let file_name = track_file_name(&meta.artist, &meta.title);
        let output = self.download_dir.join(&file_name);
        if tokio::fs::try_exists(&output).await? {
            info!("文件已存在，跳过: {}", file_name);
            return Ok(TrackOutcome::Skipped);
        }
        tokio::fs::create_dir_all(&self.download_dir).await?;

        let result = self
            .downloader
            .download_audio(&meta.artist, &meta.title, &output, &self.options)
            .await;
        if !result.success {
            return Err(DownloaderError::Exhausted(
                result.error.unwrap_or_else(|| file_name.clone()),
            ));
        }

        let proposal = reconcile::propose(
            &meta,
            result.discovered_metadata.as_ref(),
            self.reference.as_deref(),
        )
        .await;
        let tags = TagSet::from_meta(&meta, proposal.as_ref());
        let cover = self.download_cover(&meta).await;

        // 标签写入失败时保留未写标签的文件
        if let Err(e) = self
            .tag_writer
            .apply(&output, &output, &tags, cover.as_deref())
            .await
        {
            warn!("写入标签失败，保留原文件 {}: {}", file_name, e);
        }
        if let Some(cover) = &cover
            && let Err(e) = tokio::fs::remove_file(cover).await
        {
            warn!("删除临时封面失败 {:?}: {}", cover, e);
        }

        Ok(TrackOutcome::Downloaded)
    }

    /// 把第一张封面图片下载到下载目录中的临时文件，失败时返回 `None`。
    async fn download_cover(&self, meta: &TrackMeta) -> Option<PathBuf> {
        let bytes = self.fetch_cover(meta).await?;
        let path = self
            .download_dir
            .join(format!(".cover.{}.jpg", Uuid::new_v4().simple()));
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("保存封面失败: {}", e);
                None
            }
        }
    }

    /// 下载第一张封面图片，失败时返回 `None`。
    async fn fetch_cover(&self, meta: &TrackMeta) -> Option<Vec<u8>> {
        let image = meta.images.first()?;
        let response = match self.http_client.get(&image.url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("下载封面失败: {}", e);
                return None;
            }
        };
        if !response.status().is_success() {
            warn!("下载封面失败: HTTP {}", response.status().as_u16());
            return None;
        }
        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                warn!("读取封面失败: {}", e);
                None
            }
        }
    }

    /// 把失败记录追加到 `failed_tracks.json`。
    async fn record_failure(&self, track_ref: &str, error: &str) -> Result<()> {
        append_failed_track(
            &self.failed_tracks_path(),
            FailedTrack {
                url: track_ref.to_string(),
                error: error.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            },
        )
        .await
    }
}

/// 读取已有记录（不存在或损坏时从空列表开始），追加一条后写回。
async fn append_failed_track(path: &Path, record: FailedTrack) -> Result<()> {
    let mut records: Vec<FailedTrack> = match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("失败记录文件无法解析，将重新创建: {}", e);
            Vec::new()
        }),
        Err(_) => Vec::new(),
    };
    records.push(record);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(&records)?).await?;
    debug!("已记录失败歌曲，共 {} 条。", records.len());
    Ok(())
}
