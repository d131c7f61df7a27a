//! 通过 `yt-dlp` 的 `ytsearch1:` 搜索并下载 YouTube 音频。

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{DownloaderError, Result},
    model::{download::ProviderId, track::WantedTrack},
    providers::{AudioSource, SourceAttempt},
};

/// 以 `yt-dlp` 为后端的通用音源。
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    program: PathBuf,
    cookies: Option<PathBuf>,
}

impl Default for YtDlpSource {
    fn default() -> Self {
        Self::new("yt-dlp", None)
    }
}

impl YtDlpSource {
    /// 创建音源。
    ///
    /// # 参数
    /// * `program` - `yt-dlp` 可执行文件，可以只是名字（从 PATH 查找）。
    /// * `cookies` - 可选的 Cookie 文件，用于需要登录的视频。
    pub fn new(program: impl Into<PathBuf>, cookies: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: cookies.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// 构造 `yt-dlp` 的命令行参数。
    pub fn build_args(&self, query: &str, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".into());
            args.push(cookies.into());
        }
        for flag in [
            "-x",
            "--audio-format",
            "mp3",
            "--no-playlist",
            "--force-overwrites",
            "--no-part",
            "-o",
        ] {
            args.push(flag.into());
        }
        args.push(output.into());
        args.push(format!("ytsearch1:{query}").into());
        args
    }

    async fn run(&self, query: &str, temp_path: &Path) -> Result<()> {
        let args = self.build_args(query, temp_path);
        debug!("执行 {:?} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                DownloaderError::ToolFailed(format!(
                    "无法启动 yt-dlp，请确认已安装并在 PATH 中可用: {e}"
                ))
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => match output.status.code() {
                Some(code) => format!("yt-dlp 退出码 {code}"),
                None => "yt-dlp 被信号终止".to_string(),
            },
            trimmed => trimmed.to_string(),
        };
        Err(DownloaderError::ToolFailed(message))
    }
}

/// `yt-dlp` 的临时输出路径：与目标同目录，保留 `.mp3` 扩展名。
fn temp_output_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    output.with_file_name(format!(".{}.{}.mp3", stem, Uuid::new_v4().simple()))
}

#[async_trait]
impl AudioSource for YtDlpSource {
    fn id(&self) -> ProviderId {
        ProviderId::YouTube
    }

    #[instrument(skip(self, output), fields(artist = %wanted.artist, title = %wanted.title))]
    async fn fetch(&self, wanted: &WantedTrack, output: &Path) -> SourceAttempt {
        let query = format!("{} - {}", wanted.artist, wanted.title);
        let temp_path = temp_output_path(output);

        let result = async {
            // yt-dlp 会自行创建目录，这里先确认父目录存在
            if let Some(parent) = output.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::metadata(parent).await?;
            }
            self.run(&query, &temp_path).await?;
            tokio::fs::rename(&temp_path, output).await?;
            Ok::<(), DownloaderError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("YouTube 下载完成: {:?}", output);
                SourceAttempt::success(None)
            }
            Err(e) => {
                warn!("YouTube 下载失败: {}", e);
                let _ = tokio::fs::remove_file(&temp_path).await;
                SourceAttempt::failure(e, None)
            }
        }
    }
}
