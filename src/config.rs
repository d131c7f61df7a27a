//! 负责处理应用的持久化配置。

use std::{fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{DownloaderError, Result},
    model::download::{DEFAULT_MAX_RETRIES_PER_PROVIDER, DownloadOptions, ProviderId},
};

/// 配置目录名。
const CONFIG_DIR_NAME: &str = "audio-fetcher";
/// 主配置文件名。
pub const CONFIG_FILE_NAME: &str = "config.json";
/// 酷狗登录状态文件名。
pub const KUGOU_AUTH_FILE_NAME: &str = "kugou_auth.json";
/// 本地 KuGouMusicApi 服务的默认地址。
pub const DEFAULT_KUGOU_API_URL: &str = "http://localhost:3000";

/// 下载器的全部配置项。
///
/// 文件中缺失的字段取默认值。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DownloaderConfig {
    /// 音频文件的输出目录。
    pub download_dir: PathBuf,
    /// 本地 KuGouMusicApi 服务地址。
    pub kugou_api_url: String,
    /// `yt-dlp` 可执行文件。
    pub ytdlp_path: PathBuf,
    /// 传给 `yt-dlp --cookies` 的 Cookie 文件。
    pub ytdlp_cookies: Option<PathBuf>,
    /// 首选音源。
    pub preferred_provider: Option<ProviderId>,
    /// 是否允许使用酷狗（仍需已登录且服务可用）。
    pub kugou_enabled: bool,
    /// 每个音源的最大尝试次数。
    pub max_retries_per_provider: u32,
    /// 重试基础间隔（毫秒）。
    pub retry_delay_ms: u64,
    /// 批量下载时两首歌之间的间隔（毫秒）。
    pub inter_track_delay_ms: u64,
    /// 没有高分候选时是否退而使用分数最高的候选。
    pub allow_low_confidence_fallback: bool,
    /// Spotify 应用的 Client ID。
    pub spotify_client_id: Option<String>,
    /// Spotify 应用的 Client Secret。
    pub spotify_client_secret: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            kugou_api_url: DEFAULT_KUGOU_API_URL.to_string(),
            ytdlp_path: PathBuf::from("yt-dlp"),
            ytdlp_cookies: None,
            preferred_provider: None,
            kugou_enabled: true,
            max_retries_per_provider: DEFAULT_MAX_RETRIES_PER_PROVIDER,
            retry_delay_ms: 1000,
            inter_track_delay_ms: 1000,
            allow_low_confidence_fallback: true,
            spotify_client_id: None,
            spotify_client_secret: None,
        }
    }
}

/// 获取应用配置目录下指定文件的完整路径。
///
/// # 参数
/// * `filename` - 目标配置文件的名称，例如 "kugou_auth.json"。
pub fn get_config_file_path(filename: &str) -> Result<PathBuf> {
    if let Some(mut config_dir) = dirs::config_dir() {
        config_dir.push(CONFIG_DIR_NAME);
        fs::create_dir_all(&config_dir)?;
        config_dir.push(filename);
        Ok(config_dir)
    } else {
        Err(DownloaderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "无法找到用户配置目录",
        )))
    }
}

impl DownloaderConfig {
    /// 从默认位置加载配置，并叠加环境变量。
    ///
    /// 配置文件不存在时使用默认值。
    pub fn load() -> Result<Self> {
        let path = get_config_file_path(CONFIG_FILE_NAME)?;
        let mut config = match fs::read_to_string(&path) {
            Ok(content) => {
                let config: Self = serde_json::from_str(&content)?;
                info!("已从 {:?} 加载配置。", path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("配置文件不存在，使用默认配置。");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 将配置保存到默认位置。
    pub fn save(&self) -> Result<()> {
        let path = get_config_file_path(CONFIG_FILE_NAME)?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("配置已保存。");
        Ok(())
    }

    /// 用环境变量覆盖配置项。
    ///
    /// `lookup` 通常是 `std::env::var`，空值会被忽略。
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(cookies) = get("YTDLP_COOKIES") {
            self.ytdlp_cookies = Some(PathBuf::from(cookies));
        }
        if let Some(url) = get("KUGOU_API_URL") {
            self.kugou_api_url = url;
        }
        if let Some(id) = get("SPOTIFY_CLIENT_ID") {
            self.spotify_client_id = Some(id);
        }
        if let Some(secret) = get("SPOTIFY_CLIENT_SECRET") {
            self.spotify_client_secret = Some(secret);
        }
    }

    /// 由配置生成单次下载的默认选项。
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            preferred_provider: self.preferred_provider,
            secondary_enabled: None,
            max_retries_per_provider: self.max_retries_per_provider,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// 批量下载时两首歌之间的间隔。
    pub fn inter_track_delay(&self) -> Duration {
        Duration::from_millis(self.inter_track_delay_ms)
    }
}
