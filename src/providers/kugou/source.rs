//! 酷狗音源：搜索、筛选候选、解析链接、下载。

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::{
    error::{DownloaderError, Result},
    model::{download::ProviderId, track::WantedTrack},
    providers::{AudioSource, SourceAttempt, kugou::KugouCatalog},
    retrieval::Retriever,
    search::search_with_widening,
};

/// 以酷狗曲库为后端的 [`AudioSource`]。
pub struct KugouSource {
    catalog: Arc<dyn KugouCatalog>,
    retriever: Retriever,
    allow_low_confidence_fallback: bool,
}

impl KugouSource {
    /// 创建音源。
    ///
    /// `allow_low_confidence_fallback` 为假时，没有高分候选就直接判定为未找到。
    pub fn new(catalog: Arc<dyn KugouCatalog>, allow_low_confidence_fallback: bool) -> Result<Self> {
        Ok(Self::with_retriever(
            catalog,
            Retriever::new()?,
            allow_low_confidence_fallback,
        ))
    }

    /// 使用指定的下载器创建音源。
    pub fn with_retriever(
        catalog: Arc<dyn KugouCatalog>,
        retriever: Retriever,
        allow_low_confidence_fallback: bool,
    ) -> Self {
        Self {
            catalog,
            retriever,
            allow_low_confidence_fallback,
        }
    }
}

#[async_trait]
impl AudioSource for KugouSource {
    fn id(&self) -> ProviderId {
        ProviderId::Kugou
    }

    #[instrument(skip(self, output), fields(artist = %wanted.artist, title = %wanted.title))]
    async fn fetch(&self, wanted: &WantedTrack, output: &Path) -> SourceAttempt {
        let selection = match search_with_widening(
            self.catalog.as_ref(),
            wanted,
            self.allow_low_confidence_fallback,
        )
        .await
        {
            Ok(selection) => selection,
            Err(e) => return SourceAttempt::failure(e, None),
        };

        // 只尝试排名第一的候选
        let Some(top) = selection.ranking.candidates().first() else {
            return SourceAttempt::failure(
                DownloaderError::NotFound(format!("{} - {}", wanted.artist, wanted.title)),
                None,
            );
        };
        let candidate = &top.candidate;
        let discovered = candidate.discovered_metadata(&wanted.title, &wanted.artist);
        info!(
            "选择: {} - {} (匹配分数: {})",
            candidate.singer_name, candidate.song_name, top.match_score
        );

        let url = match self.catalog.resolve_play_url(&candidate.source_id).await {
            Ok(url) => url,
            Err(e) => {
                warn!("无法获取下载链接: {}", e);
                return SourceAttempt::failure(e, Some(discovered));
            }
        };

        match self
            .retriever
            .retrieve(&url, Some(&candidate.source_id), output)
            .await
        {
            Ok(_) => SourceAttempt::success(Some(discovered)),
            Err(e) => SourceAttempt::failure(e, Some(discovered)),
        }
    }
}
