//! 音源模块
//!
//! 该模块定义了下载调度器与各个音源交互的核心抽象。

use std::path::Path;

use async_trait::async_trait;

use crate::{
    error::Result,
    model::{
        download::ProviderId,
        track::{DiscoveredMetadata, WantedTrack},
    },
};

pub mod kugou;
pub mod ytdlp;

/// 一次音源尝试的结果。
///
/// 即使 `outcome` 是错误，`discovered` 仍可能携带已识别候选的元数据。
#[derive(Debug)]
pub struct SourceAttempt {
    /// 是否成功把音频写到了目标路径。
    pub outcome: Result<()>,
    /// 本次尝试中识别出的候选元数据。
    pub discovered: Option<DiscoveredMetadata>,
}

impl SourceAttempt {
    /// 成功，附带可选的发现元数据。
    pub fn success(discovered: Option<DiscoveredMetadata>) -> Self {
        Self {
            outcome: Ok(()),
            discovered,
        }
    }

    /// 失败，附带可选的发现元数据。
    pub fn failure(
        error: crate::error::DownloaderError,
        discovered: Option<DiscoveredMetadata>,
    ) -> Self {
        Self {
            outcome: Err(error),
            discovered,
        }
    }
}

/// 定义了所有音源需要实现的通用接口。
#[async_trait]
pub trait AudioSource: Send + Sync {
    ///
    /// 返回音源的标识。
    ///
    fn id(&self) -> ProviderId;

    ///
    /// 返回面向用户的显示名称。
    ///
    fn display_name(&self) -> &'static str {
        self.id().display_name()
    }

    ///
    /// 搜索并下载目标歌曲到 `output`。
    ///
    /// # 参数
    /// * `wanted` - 目标歌曲。
    /// * `output` - 最终的音频文件路径。实现必须先写到临时文件再重命名到这里。
    ///
    /// # 返回
    /// 一个 `SourceAttempt`，其中 `outcome` 表示成败，错误通过
    /// [`crate::error::DownloaderError::kind`] 决定是否重试。
    ///
    async fn fetch(&self, wanted: &WantedTrack, output: &Path) -> SourceAttempt;
}
