//! 音频字节的下载与落盘。
//!
//! 地区曲库的 CDN 对请求头很敏感：先用浏览器风格的请求头，
//! 遇到 403 再换成客户端设备的最小请求头。

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use futures::{Stream, StreamExt};
use reqwest::{
    Client, StatusCode,
    header::{self, HeaderMap, HeaderName, HeaderValue},
    redirect::Policy,
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{DownloaderError, Result};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEVICE_USER_AGENT: &str = "KuGou2012-9020-ExpandMusic";
const KUGOU_WEB_ORIGIN: &str = "https://www.kugou.com";

/// 单次下载请求的超时时间。
pub const RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(60);
/// 最多跟随的重定向次数。
pub const MAX_REDIRECTS: usize = 5;

/// 一种下载请求的构造方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    /// 模拟浏览器的完整请求头。
    BrowserLike,
    /// 只带客户端 UA 的最小请求头。
    Device,
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalStrategy::BrowserLike => f.write_str("浏览器请求头"),
            RetrievalStrategy::Device => f.write_str("客户端请求头"),
        }
    }
}

impl RetrievalStrategy {
    /// 默认的尝试顺序。
    pub const ORDERED: [RetrievalStrategy; 2] =
        [RetrievalStrategy::BrowserLike, RetrievalStrategy::Device];

    /// 构造该策略的请求头。`source_hash` 只在浏览器策略中作为 `X-Hash` 发送。
    pub fn headers(self, source_hash: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match self {
            RetrievalStrategy::BrowserLike => {
                let fixed = [
                    (header::USER_AGENT, BROWSER_USER_AGENT),
                    (header::ACCEPT, "*/*"),
                    (header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8"),
                    (header::ACCEPT_ENCODING, "identity"),
                    (header::CONNECTION, "keep-alive"),
                    (header::REFERER, "https://www.kugou.com/"),
                    (header::ORIGIN, KUGOU_WEB_ORIGIN),
                    (HeaderName::from_static("sec-fetch-dest"), "audio"),
                    (HeaderName::from_static("sec-fetch-mode"), "cors"),
                    (HeaderName::from_static("sec-fetch-site"), "same-site"),
                ];
                for (name, value) in fixed {
                    headers.insert(name, HeaderValue::from_static(value));
                }
                if let Some(hash) = source_hash
                    && let Ok(value) = HeaderValue::from_str(hash)
                {
                    headers.insert(HeaderName::from_static("x-hash"), value);
                }
            }
            RetrievalStrategy::Device => {
                headers.insert(header::USER_AGENT, HeaderValue::from_static(DEVICE_USER_AGENT));
            }
        }
        headers
    }
}

/// 单个下载策略失败的原因。
#[derive(Debug, Error)]
pub enum RetrievalFailure {
    /// 服务器拒绝访问，可以换下一个策略。
    #[error("访问被拒绝 (HTTP {0})")]
    AccessDenied(u16),
    /// 其他非成功状态码。
    #[error("HTTP 状态码异常: {0}")]
    Status(u16),
    /// 连接、超时或数据流中断。
    #[error("传输失败: {0}")]
    Transport(String),
    /// 本地写盘失败。
    #[error("写入文件失败: {0}")]
    Write(#[from] std::io::Error),
}

impl RetrievalFailure {
    /// 是否应该尝试下一个策略。
    pub fn allows_next_strategy(&self) -> bool {
        matches!(self, RetrievalFailure::AccessDenied(_))
    }
}

impl From<RetrievalFailure> for DownloaderError {
    fn from(failure: RetrievalFailure) -> Self {
        match failure {
            RetrievalFailure::Write(e) => DownloaderError::Io(e),
            other => DownloaderError::Network(other.to_string()),
        }
    }
}

/// 按策略顺序下载音频并原子地写入目标路径。
#[derive(Debug, Clone)]
pub struct Retriever {
    client: Client,
    strategies: Vec<RetrievalStrategy>,
}

impl Retriever {
    /// 使用默认策略顺序、60 秒超时、最多 5 次重定向。
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(RETRIEVAL_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self::with_client(client, RetrievalStrategy::ORDERED.to_vec()))
    }

    /// 使用给定的客户端和策略顺序。
    pub fn with_client(client: Client, strategies: Vec<RetrievalStrategy>) -> Self {
        Self { client, strategies }
    }

    /// 依次尝试各个策略，返回成功的策略。
    ///
    /// 只有访问被拒绝时才会换下一个策略，其他失败直接返回。
    #[instrument(skip(self, destination))]
    pub async fn retrieve(
        &self,
        url: &str,
        source_hash: Option<&str>,
        destination: &Path,
    ) -> Result<RetrievalStrategy> {
        let mut last_failure = None;

        for &strategy in &self.strategies {
            debug!("使用{}下载: {}", strategy, url);
            match self.try_strategy(strategy, url, source_hash, destination).await {
                Ok(bytes) => {
                    info!("下载完成 ({}，{} 字节)", strategy, bytes);
                    return Ok(strategy);
                }
                Err(failure) if failure.allows_next_strategy() => {
                    warn!("{}下载失败: {}，尝试下一种方式", strategy, failure);
                    last_failure = Some(failure);
                }
                Err(failure) => {
                    warn!("{}下载失败: {}", strategy, failure);
                    return Err(failure.into());
                }
            }
        }

        Err(last_failure
            .map(DownloaderError::from)
            .unwrap_or_else(|| DownloaderError::Internal("没有可用的下载策略".to_string())))
    }

    async fn try_strategy(
        &self,
        strategy: RetrievalStrategy,
        url: &str,
        source_hash: Option<&str>,
        destination: &Path,
    ) -> std::result::Result<u64, RetrievalFailure> {
        let response = self
            .client
            .get(url)
            .headers(strategy.headers(source_hash))
            .send()
            .await
            .map_err(|e| RetrievalFailure::Transport(e.to_string()))?;

        let status = response.status();
        debug!(
            "下载响应状态: {}, Content-Type: {:?}",
            status,
            response.headers().get(header::CONTENT_TYPE)
        );
        if status == StatusCode::FORBIDDEN {
            return Err(RetrievalFailure::AccessDenied(status.as_u16()));
        }
        if !status.is_success() {
            return Err(RetrievalFailure::Status(status.as_u16()));
        }

        write_stream_atomically(response.bytes_stream(), destination)
            .await
            .map_err(|e| match e {
                WriteError::Stream(msg) => RetrievalFailure::Transport(msg),
                WriteError::Io(e) => RetrievalFailure::Write(e),
            })
    }
}

/// 原子写入失败的原因。
#[derive(Debug, Error)]
pub enum WriteError {
    /// 上游数据流出错。
    #[error("数据流错误: {0}")]
    Stream(String),
    /// 本地文件操作出错。
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<WriteError> for DownloaderError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Stream(msg) => DownloaderError::Network(msg),
            WriteError::Io(e) => DownloaderError::Io(e),
        }
    }
}

/// 目标路径旁边的临时文件路径，同目录保证重命名是原子的。
pub fn temp_sibling_path(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!(".{}.{}.part", file_name, Uuid::new_v4().simple()))
}

/// 把字节流写入临时文件，全部写完并刷新后再重命名到 `destination`。
///
/// 任何失败都会删除临时文件，`destination` 要么是完整的新文件，要么保持原样。
/// 不会创建父目录，目录不存在时返回 I/O 错误。
pub async fn write_stream_atomically<S, B, E>(
    stream: S,
    destination: &Path,
) -> std::result::Result<u64, WriteError>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let temp_path = temp_sibling_path(destination);
    let result = write_to(stream, &temp_path).await;

    match result {
        Ok(written) => {
            if let Err(e) = tokio::fs::rename(&temp_path, destination).await {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
            debug!("文件写入完成: {:?}", destination);
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp_path).await;
            Err(e)
        }
    }
}

async fn write_to<S, B, E>(stream: S, path: &Path) -> std::result::Result<u64, WriteError>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    let mut stream = std::pin::pin!(stream);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| WriteError::Stream(e.to_string()))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes).await?;
        written += bytes.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::test_support::{StubResponse, spawn_stub};

    /// 浏览器 UA 得到 403，客户端 UA 得到音频字节。
    async fn spawn_picky_cdn(
        reject_all: bool,
    ) -> (String, std::sync::Arc<std::sync::Mutex<Vec<crate::test_support::StubRequest>>>) {
        let (base, seen) = spawn_stub(move |req| {
            let ua = req.header("user-agent").unwrap_or_default();
            if ua == DEVICE_USER_AGENT && !reject_all {
                StubResponse::bytes(b"audio-bytes")
            } else {
                StubResponse::status(403)
            }
        })
        .await;
        (format!("{base}/song.mp3"), seen)
    }

    #[test]
    fn test_strategy_headers() {
        let browser = RetrievalStrategy::BrowserLike.headers(Some("ABCDEF"));
        assert_eq!(browser.get(header::ACCEPT_ENCODING).unwrap(), "identity");
        assert_eq!(browser.get("x-hash").unwrap(), "ABCDEF");
        assert_eq!(browser.get(header::REFERER).unwrap(), "https://www.kugou.com/");

        let device = RetrievalStrategy::Device.headers(Some("ABCDEF"));
        assert_eq!(device.len(), 1);
        assert_eq!(device.get(header::USER_AGENT).unwrap(), DEVICE_USER_AGENT);
    }

    #[tokio::test]
    async fn test_forbidden_falls_back_to_device_strategy() {
        let (url, seen) = spawn_picky_cdn(false).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("song.mp3");

        let strategy = Retriever::new()
            .unwrap()
            .retrieve(&url, Some("ABCDEF"), &dest)
            .await
            .unwrap();

        assert_eq!(strategy, RetrievalStrategy::Device);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"audio-bytes");

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].header("user-agent"), Some(BROWSER_USER_AGENT));
        assert_eq!(seen[0].header("x-hash"), Some("ABCDEF"));
        assert_eq!(seen[1].header("user-agent"), Some(DEVICE_USER_AGENT));
        assert_eq!(seen[1].header("x-hash"), None);
    }

    #[tokio::test]
    async fn test_all_strategies_denied_leaves_no_file() {
        let (url, seen) = spawn_picky_cdn(true).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("song.mp3");

        let err = Retriever::new()
            .unwrap()
            .retrieve(&url, None, &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloaderError::Network(_)));
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_other_status_does_not_switch_strategy() {
        let (base, seen) = spawn_stub(|_| StubResponse::status(404)).await;
        let dir = tempfile::tempdir().unwrap();

        let err = Retriever::new()
            .unwrap()
            .retrieve(&format!("{base}/gone.mp3"), None, &dir.path().join("gone.mp3"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::FailureKind::Transient);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_atomic_write_success() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp3");
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            vec![Ok(b"abc".to_vec()), Ok(b"def".to_vec())];

        let written = write_stream_atomically(stream::iter(chunks), &dest)
            .await
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
        assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_atomic_write_does_not_create_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing").join("out.mp3");
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![Ok(b"abc".to_vec())];

        let err = write_stream_atomically(stream::iter(chunks), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::Io(_)));
        assert!(!dir.path().join("missing").exists());
    }

    #[tokio::test]
    async fn test_atomic_write_failure_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp3");
        std::fs::write(&dest, b"old").unwrap();

        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"partial".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ];
        let err = write_stream_atomically(stream::iter(chunks), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::Stream(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
