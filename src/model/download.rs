//! 定义了下载调度器的输入选项与统一的下载结果。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{error::FailureKind, model::track::DiscoveredMetadata};

/// 音源标识。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderId {
    /// 排名第一的通用音源：通过 yt-dlp 搜索 YouTube Music。
    #[strum(to_string = "youtube", serialize = "ytmusic")]
    YouTube,
    /// 排名第二的地区曲库：酷狗音乐。
    Kugou,
}

impl ProviderId {
    /// 面向用户的显示名称。
    pub fn display_name(self) -> &'static str {
        match self {
            ProviderId::YouTube => "YouTube Music",
            ProviderId::Kugou => "酷狗音乐",
        }
    }
}

/// 默认的每个音源最大尝试次数。
pub const DEFAULT_MAX_RETRIES_PER_PROVIDER: u32 = 2;

/// 默认的重试基础间隔，实际等待时间为 `retry_delay * attempt`。
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 单次 `download_audio` 调用的选项。
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// 首选音源，`None` 表示使用默认顺序。
    pub preferred_provider: Option<ProviderId>,
    /// 是否启用地区曲库，`None` 表示沿用构造时探测到的可用性。
    pub secondary_enabled: Option<bool>,
    /// 每个音源的最大尝试次数（包含首次尝试）。
    pub max_retries_per_provider: u32,
    /// 重试的基础间隔。
    pub retry_delay: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            secondary_enabled: None,
            max_retries_per_provider: DEFAULT_MAX_RETRIES_PER_PROVIDER,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// 一次尝试的记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 本次尝试使用的音源。
    pub provider: ProviderId,
    /// 在该音源上的第几次尝试，从 1 开始。
    pub attempt: u32,
    /// 失败分类，成功时为 `None`。
    pub failure: Option<FailureKind>,
    /// 失败信息。
    pub message: Option<String>,
}

/// 一次下载调用的统一结果。
///
/// 调度器从不返回错误，所有失败信息都在这个结构里。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// 是否成功写出了音频。
    pub success: bool,
    /// 成功时为实际产出音频的音源；失败时为首选音源。
    pub provider: ProviderId,
    /// 音源的显示名称。
    pub provider_display_name: Option<String>,
    /// 最后一次失败的错误信息。
    pub error: Option<String>,
    /// 整体失败分类，成功时为 `None`。
    pub failure: Option<FailureKind>,
    /// 地区曲库顺带发现的元数据。
    pub discovered_metadata: Option<DiscoveredMetadata>,
    /// 按时间顺序记录的每一次尝试。
    pub attempts: Vec<AttemptRecord>,
}

impl DownloadResult {
    /// 某个音源上进行过的尝试次数。
    pub fn attempts_for(&self, provider: ProviderId) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.provider == provider)
            .count()
    }
}
