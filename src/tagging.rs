//! 把最终标签写入音频文件。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lofty::{
    config::WriteOptions,
    file::TaggedFileExt,
    picture::{Picture, PictureType},
    probe::Probe,
    tag::{Accessor, ItemKey, Tag, TagExt},
};
use tracing::{debug, warn};

use crate::{
    error::{DownloaderError, Result},
    model::track::TagSet,
    retrieval::temp_sibling_path,
};

/// 标签写入器。
#[async_trait]
pub trait TagWriter: Send + Sync {
    /// 把 `tags`（以及可选的本地封面图片）写入 `input`，结果保存到 `output`。
    ///
    /// `input` 与 `output` 可以相同。失败时 `input` 保持原样。
    async fn apply(
        &self,
        input: &Path,
        output: &Path,
        tags: &TagSet,
        cover: Option<&Path>,
    ) -> Result<()>;
}

/// 基于 `lofty` 的标签写入器，支持 MP3、FLAC、M4A、WAV 等格式。
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagWriter;

#[async_trait]
impl TagWriter for LoftyTagWriter {
    async fn apply(
        &self,
        input: &Path,
        output: &Path,
        tags: &TagSet,
        cover: Option<&Path>,
    ) -> Result<()> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let tags = tags.clone();
        let cover = cover.map(Path::to_path_buf);

        tokio::task::spawn_blocking(move || write_tags(&input, &output, &tags, cover.as_deref()))
            .await
            .map_err(|e| DownloaderError::Internal(format!("标签写入任务异常: {e}")))?
    }
}

/// 先复制到临时文件并写入标签，成功后再重命名到 `output`。
fn write_tags(input: &Path, output: &Path, tags: &TagSet, cover: Option<&Path>) -> Result<()> {
    let temp_path: PathBuf = temp_sibling_path(output);
    std::fs::copy(input, &temp_path)?;

    match write_tags_in_place(&temp_path, tags, cover) {
        Ok(()) => {
            if let Err(e) = std::fs::rename(&temp_path, output) {
                let _ = std::fs::remove_file(&temp_path);
                return Err(e.into());
            }
            debug!("标签已写入: {:?}", output);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

fn write_tags_in_place(path: &Path, tags: &TagSet, cover: Option<&Path>) -> Result<()> {
    let mut tagged_file = Probe::open(path)?.read()?;

    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| DownloaderError::Internal("无法创建标签".to_string()))?;

    tag.set_title(tags.title.clone());
    tag.set_artist(tags.artist.clone());
    if !tags.album.is_empty() {
        tag.set_album(tags.album.clone());
    }
    if let Some(album_artist) = &tags.album_artist {
        tag.insert_text(ItemKey::AlbumArtist, album_artist.clone());
    }
    if let Some(track) = tags.track_number {
        tag.set_track(track);
    }
    if let Some(total) = tags.total_tracks {
        tag.set_track_total(total);
    }
    if let Some(disc) = tags.disc_number {
        tag.set_disk(disc);
    }
    if let Some(year) = tags.year {
        tag.set_year(year);
    }

    if let Some(cover) = cover {
        match read_picture(cover) {
            Ok(mut picture) => {
                picture.set_pic_type(PictureType::CoverFront);
                tag.remove_picture_type(PictureType::CoverFront);
                tag.push_picture(picture);
            }
            Err(e) => warn!("封面图片 {:?} 无法读取，跳过: {}", cover, e),
        }
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

fn read_picture(path: &Path) -> Result<Picture> {
    let mut file = std::fs::File::open(path)?;
    Ok(Picture::from_reader(&mut file)?)
}
