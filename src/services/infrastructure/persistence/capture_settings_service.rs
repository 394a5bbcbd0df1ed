/// 采集运行时设置的持久化
/// 保存通过设置接口修改的 enabled / polling_interval_ms，重启后恢复

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::services::traits::BaseService;
use crate::utils::config::validate_polling_interval;
use crate::utils::error::{AppError, AppResult};

/// 采集运行时设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    pub enabled: bool,
    pub polling_interval_ms: u64,
}

/// 采集设置服务接口
#[async_trait]
pub trait ICaptureSettingsService: BaseService {
    /// 保存设置
    async fn save_settings(&self, settings: &CaptureSettings) -> AppResult<()>;

    /// 加载设置，文件不存在时返回 None
    async fn load_settings(&self) -> AppResult<Option<CaptureSettings>>;
}

/// JSON文件采集设置服务
#[derive(Debug, Clone)]
pub struct JsonCaptureSettingsService {
    storage_root_dir: PathBuf,
    file_name: String,
}

impl JsonCaptureSettingsService {
    pub fn new(storage_root_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_root_dir: storage_root_dir.into(),
            file_name: "capture_settings.json".to_string(),
        }
    }

    /// 获取设置文件完整路径
    pub fn settings_file_path(&self) -> PathBuf {
        self.storage_root_dir.join(&self.file_name)
    }

    /// 确保设置目录存在
    async fn ensure_directory_exists(&self) -> AppResult<()> {
        if !self.storage_root_dir.exists() {
            tokio::fs::create_dir_all(&self.storage_root_dir).await.map_err(|e| {
                AppError::io_error(
                    format!("创建设置目录 {:?} 失败", self.storage_root_dir),
                    e.kind().to_string(),
                )
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl BaseService for JsonCaptureSettingsService {
    fn service_name(&self) -> &'static str {
        "JsonCaptureSettingsService"
    }

    async fn initialize(&self) -> AppResult<()> {
        self.ensure_directory_exists().await
    }

    async fn health_check(&self) -> AppResult<()> {
        if !self.storage_root_dir.is_dir() {
            return Err(AppError::persistence_error(format!(
                "设置目录 {:?} 不可访问",
                self.storage_root_dir
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ICaptureSettingsService for JsonCaptureSettingsService {
    async fn save_settings(&self, settings: &CaptureSettings) -> AppResult<()> {
        self.ensure_directory_exists().await?;

        let file_path = self.settings_file_path();
        let json_content = serde_json::to_string_pretty(settings)
            .map_err(|e| AppError::json_error(format!("序列化采集设置失败: {}", e)))?;

        tokio::fs::write(&file_path, json_content).await.map_err(|e| {
            AppError::io_error(format!("写入设置文件 {:?} 失败", file_path), e.kind().to_string())
        })?;
        Ok(())
    }

    async fn load_settings(&self) -> AppResult<Option<CaptureSettings>> {
        let file_path = self.settings_file_path();
        if !file_path.exists() {
            return Ok(None);
        }

        let json_content = tokio::fs::read_to_string(&file_path).await.map_err(|e| {
            AppError::io_error(format!("读取设置文件 {:?} 失败", file_path), e.kind().to_string())
        })?;

        let settings: CaptureSettings = serde_json::from_str(&json_content)
            .map_err(|e| AppError::json_error(format!("反序列化采集设置失败: {}", e)))?;
        validate_polling_interval(settings.polling_interval_ms)?;
        Ok(Some(settings))
    }
}
