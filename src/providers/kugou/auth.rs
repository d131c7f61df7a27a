//! 酷狗登录状态的存取。
//!
//! 登录流程本身（扫码等）不在本库内实现，这里只读取、保存和清除登录结果。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    config::{KUGOU_AUTH_FILE_NAME, get_config_file_path},
    error::Result,
    providers::kugou::models::KugouAuthRecord,
};

/// 酷狗登录状态的只读查询接口。
#[async_trait]
pub trait KugouAuth: Send + Sync {
    /// 是否存在未过期的登录状态。
    async fn is_logged_in(&self) -> bool {
        self.cookies().await.is_some()
    }

    /// 请求时附带的 Cookie，未登录或已过期时为 `None`。
    async fn cookies(&self) -> Option<String>;
}

/// 以 JSON 文件持久化的登录状态。
#[derive(Debug, Clone)]
pub struct FileKugouAuth {
    path: PathBuf,
}

impl FileKugouAuth {
    /// 使用指定的文件路径。
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 使用配置目录下的 `kugou_auth.json`。
    pub fn from_config_dir() -> Result<Self> {
        Ok(Self::new(get_config_file_path(KUGOU_AUTH_FILE_NAME)?))
    }

    /// 状态文件路径。
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取登录状态。文件不存在、无法解析或已过期时返回 `None`。
    pub async fn load(&self) -> Option<KugouAuthRecord> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("读取酷狗登录状态失败: {}", e);
                return None;
            }
        };

        let record: KugouAuthRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                warn!("酷狗登录状态文件格式错误: {}", e);
                return None;
            }
        };

        if record.is_expired_at(chrono::Utc::now().timestamp_millis()) {
            warn!("酷狗登录信息已过期，需要重新登录");
            return None;
        }

        Some(record)
    }

    /// 保存登录状态。
    pub async fn save(&self, record: &KugouAuthRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&self.path, content).await?;
        info!("酷狗登录信息已保存");
        Ok(())
    }

    /// 清除登录状态。文件不存在视为成功。
    pub async fn logout(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("已退出酷狗登录");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KugouAuth for FileKugouAuth {
    async fn cookies(&self) -> Option<String> {
        self.load().await.map(|record| record.cookies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::kugou::models::DEFAULT_AUTH_EXPIRES_IN_MS;

    fn record(login_time: i64) -> KugouAuthRecord {
        KugouAuthRecord {
            user_id: "10086".to_string(),
            token: "token".to_string(),
            cookies: "token=token; userid=10086".to_string(),
            login_time,
            expires_in: DEFAULT_AUTH_EXPIRES_IN_MS,
        }
    }

    #[tokio::test]
    async fn test_save_load_logout() {
        let dir = tempfile::tempdir().unwrap();
        let auth = FileKugouAuth::new(dir.path().join(KUGOU_AUTH_FILE_NAME));
        assert!(!auth.is_logged_in().await);

        auth.save(&record(chrono::Utc::now().timestamp_millis()))
            .await
            .unwrap();
        assert!(auth.is_logged_in().await);
        assert_eq!(
            auth.cookies().await.as_deref(),
            Some("token=token; userid=10086")
        );

        auth.logout().await.unwrap();
        assert!(!auth.is_logged_in().await);
        auth.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_record_is_not_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let auth = FileKugouAuth::new(dir.path().join(KUGOU_AUTH_FILE_NAME));
        let stale = chrono::Utc::now().timestamp_millis() - DEFAULT_AUTH_EXPIRES_IN_MS - 60_000;
        auth.save(&record(stale)).await.unwrap();
        assert!(!auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_not_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KUGOU_AUTH_FILE_NAME);
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(FileKugouAuth::new(path).load().await.is_none());
    }
}
