//! 定义了整个 `audio-fetcher` 库的错误类型 `DownloaderError`，以及用于重试决策的失败分类。

use std::io;
use thiserror::Error;

/// `audio-fetcher` 库的通用错误枚举。
#[derive(Error, Debug)]
pub enum DownloaderError {
    /// 网络请求失败 (源自 `reqwest::Error`)
    #[error("网络请求失败: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// JSON 解析失败 (源自 `serde_json::Error`)
    #[error("JSON 解析失败: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// I/O 错误 (源自 `io::Error`)
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// 读写音频标签失败 (源自 `lofty::error::LoftyError`)
    #[error("音频标签读写失败: {0}")]
    Tag(#[from] lofty::error::LoftyError),

    /// 在任何查询下都没有找到候选歌曲
    #[error("未找到匹配的歌曲: {0}")]
    NotFound(String),

    /// 找到了歌曲，但上游将其标记为不可获取（付费、地区限制或已下架）
    #[error("歌曲需要付费或有版权限制: {0}")]
    AccessRestricted(String),

    /// 更通用的网络层错误
    #[error("网络错误: {0}")]
    Network(String),

    /// HTTP 请求返回了非成功状态码
    #[error("HTTP {status}: {url}")]
    HttpStatus {
        /// 返回的状态码。
        status: u16,
        /// 请求的地址。
        url: String,
    },

    /// API 返回错误或空数据
    #[error("API 为 `{0}` 返回了错误或空数据")]
    ApiError(String),

    /// 需要登录的音源尚未登录
    #[error("未登录: {0}")]
    NotLoggedIn(String),

    /// 外部工具（例如 yt-dlp）执行失败
    #[error("外部工具执行失败: {0}")]
    ToolFailed(String),

    /// API 请求被限流
    #[error("API 请求被限流: {0}")]
    RateLimited(String),

    /// 所有音源、所有尝试都已用尽
    #[error("所有下载源均失败: {0}")]
    Exhausted(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// `DownloaderError` 的 `Result` 类型别名，方便在函数签名中使用。
pub type Result<T> = std::result::Result<T, DownloaderError>;

/// 下载失败的分类，决定了调度器是否在同一音源上重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// 没有任何音源或查询变体找到候选。
    NotFound,
    /// 找到了候选，但资源不可获取。
    AccessRestricted,
    /// 网络、超时、传输或写盘失败，可以原地重试。
    Transient,
    /// 所有音源和尝试都已用尽。
    Exhausted,
}

impl FailureKind {
    /// 这一类失败在同一个音源上重试是否可能得到不同的结果。
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::NotFound | FailureKind::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::NotFound => "NotFound",
            FailureKind::AccessRestricted => "AccessRestricted",
            FailureKind::Transient => "Transient",
            FailureKind::Exhausted => "Exhausted",
        };
        f.write_str(s)
    }
}

impl DownloaderError {
    /// 将错误归入 [`FailureKind`] 分类。
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloaderError::NotFound(_) => FailureKind::NotFound,
            DownloaderError::AccessRestricted(_) => FailureKind::AccessRestricted,
            DownloaderError::Exhausted(_) => FailureKind::Exhausted,
            DownloaderError::Reqwest(_)
            | DownloaderError::JsonParse(_)
            | DownloaderError::Io(_)
            | DownloaderError::Tag(_)
            | DownloaderError::Network(_)
            | DownloaderError::HttpStatus { .. }
            | DownloaderError::ApiError(_)
            | DownloaderError::NotLoggedIn(_)
            | DownloaderError::ToolFailed(_)
            | DownloaderError::RateLimited(_)
            | DownloaderError::Internal(_) => FailureKind::Transient,
        }
    }
}
