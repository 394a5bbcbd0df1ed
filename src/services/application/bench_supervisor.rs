/// 台架监督服务
///
/// 应用层组合根：根据 `AppConfig` 装配共享PLC句柄、快照存储、
/// 采集引擎、状态缓存和测试运行生命周期，并对外提供采集设置接口。
/// 通过设置接口修改的采集参数会持久化，重启后恢复。

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::domain::{
    CaptureEngineStatus, ITestRunLifecycle, MeasurementCaptureEngine, StatusCacheService, StatusCacheStatus,
    TestRunLifecycle, Ticker, TokioTicker,
};
use crate::services::infrastructure::persistence::{
    CaptureSettings, ICaptureSettingsService, InMemorySnapshotStore, JsonCaptureSettingsService,
    SqliteOrmSnapshotStore,
};
use crate::services::infrastructure::plc::{
    ConventionalTagAddressResolver, ITagAddressResolver, ITagReader, SerializedTagReader,
};
use crate::services::traits::{BaseService, ISnapshotStore};
use crate::utils::config::AppConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::time_utils::{Clock, SystemClock};

/// 装配监督服务所需的协作组件
pub struct BenchComponents {
    /// 底层PLC读取器，装配时包装为调用级互斥的共享句柄
    pub reader: Arc<dyn ITagReader>,
    pub store: Arc<dyn ISnapshotStore>,
    pub settings_service: Arc<dyn ICaptureSettingsService>,
    pub resolver: Arc<dyn ITagAddressResolver>,
    pub clock: Arc<dyn Clock>,
    pub capture_ticker: Arc<dyn Ticker>,
    pub cache_ticker: Arc<dyn Ticker>,
}

/// 台架整体状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchStatus {
    pub plc_connected: bool,
    pub capture: CaptureEngineStatus,
    pub status_cache: StatusCacheStatus,
}

pub struct BenchSupervisor {
    reader: Arc<dyn ITagReader>,
    store: Arc<dyn ISnapshotStore>,
    settings_service: Arc<dyn ICaptureSettingsService>,
    capture_engine: MeasurementCaptureEngine,
    status_cache: StatusCacheService,
    lifecycle: Arc<dyn ITestRunLifecycle>,
}

impl BenchSupervisor {
    /// 按配置创建存储和设置服务，并使用系统时钟与 tokio 定时器
    pub async fn from_config(config: &AppConfig, plc_reader: Arc<dyn ITagReader>) -> AppResult<Self> {
        let persistence = &config.persistence_config;
        let store: Arc<dyn ISnapshotStore> = match persistence.persistence_type.as_str() {
            "sqlite" => {
                let db_path = persistence.data_path.join(&persistence.database_file);
                Arc::new(SqliteOrmSnapshotStore::new(Some(db_path.as_path())).await?)
            }
            "memory" => {
                log::warn!("⚠️ [SUPERVISOR] 使用内存存储，测量记录不会在重启后保留");
                Arc::new(InMemorySnapshotStore::new())
            }
            other => {
                return Err(AppError::invalid_config(format!("未知的持久化类型: {}", other)));
            }
        };

        let components = BenchComponents {
            reader: plc_reader,
            store,
            settings_service: Arc::new(JsonCaptureSettingsService::new(&persistence.settings_dir)),
            resolver: Arc::new(ConventionalTagAddressResolver),
            clock: Arc::new(SystemClock),
            capture_ticker: Arc::new(TokioTicker),
            cache_ticker: Arc::new(TokioTicker),
        };
        Self::assemble(config, components).await
    }

    /// 用给定组件装配
    pub async fn assemble(config: &AppConfig, components: BenchComponents) -> AppResult<Self> {
        let BenchComponents {
            reader,
            store,
            settings_service,
            resolver,
            clock,
            capture_ticker,
            cache_ticker,
        } = components;

        let reader: Arc<dyn ITagReader> =
            Arc::new(SerializedTagReader::new(reader).with_call_timeout_ms(config.plc_config.read_timeout_ms));

        store.initialize().await?;
        settings_service.initialize().await?;

        let mut capture_config = config.capture_config.clone();
        match settings_service.load_settings().await {
            Ok(Some(saved)) => {
                log::info!(
                    "🔧 [SUPERVISOR] 恢复采集设置: 启用={}, 间隔={}ms",
                    saved.enabled,
                    saved.polling_interval_ms
                );
                capture_config.enabled = saved.enabled;
                capture_config.polling_interval_ms = saved.polling_interval_ms;
            }
            Ok(None) => {}
            Err(e) => {
                crate::log_config_warning!("采集设置文件无效，使用配置文件中的值: {}", e);
            }
        }

        let capture_engine = MeasurementCaptureEngine::new(
            &capture_config,
            reader.clone(),
            store.clone(),
            resolver.clone(),
            clock.clone(),
            capture_ticker,
        )?;
        let status_cache = StatusCacheService::new(
            &config.status_cache_config,
            reader.clone(),
            resolver.clone(),
            clock.clone(),
            cache_ticker,
        )?;
        let lifecycle: Arc<dyn ITestRunLifecycle> = Arc::new(TestRunLifecycle::new(
            config.test_run_config.clone(),
            reader.clone(),
            store.clone(),
            resolver,
            clock,
        ));

        log::info!("✅ [SUPERVISOR] 台架服务装配完成 ({})", config.app_settings.app_name);
        Ok(Self {
            reader,
            store,
            settings_service,
            capture_engine,
            status_cache,
            lifecycle,
        })
    }

    /// 启动采集引擎和状态缓存
    pub async fn start_all(&self) -> AppResult<()> {
        if let Err(e) = self.reader.health_check().await {
            log::warn!("⚠️ [SUPERVISOR] PLC当前不可用，循环将在连接恢复后继续: {}", e);
        }
        self.capture_engine.start().await?;
        self.status_cache.start().await;
        Ok(())
    }

    /// 停止两个循环，等待各自的当前周期结束
    pub async fn stop_all(&self) -> AppResult<()> {
        tokio::join!(self.capture_engine.stop(), self.status_cache.stop());
        self.store.shutdown().await?;
        log::info!("⏹️ [SUPERVISOR] 台架服务已停止");
        Ok(())
    }

    pub fn capture_engine(&self) -> &MeasurementCaptureEngine {
        &self.capture_engine
    }

    pub fn status_cache(&self) -> &StatusCacheService {
        &self.status_cache
    }

    pub fn lifecycle(&self) -> Arc<dyn ITestRunLifecycle> {
        self.lifecycle.clone()
    }

    pub fn store(&self) -> Arc<dyn ISnapshotStore> {
        self.store.clone()
    }

    // ==================== 采集设置接口 ====================

    pub fn is_enabled(&self) -> bool {
        self.capture_engine.is_enabled()
    }

    /// 启用或禁用采集并持久化
    pub async fn set_enabled(&self, enabled: bool) -> AppResult<()> {
        self.capture_engine.set_enabled(enabled).await?;
        self.persist_capture_settings().await
    }

    pub fn get_polling_interval_ms(&self) -> u64 {
        self.capture_engine.get_polling_interval_ms()
    }

    /// 修改采集轮询间隔并持久化；无效值不会被保存
    pub async fn set_polling_interval_ms(&self, interval_ms: u64) -> AppResult<()> {
        self.capture_engine.set_polling_interval_ms(interval_ms)?;
        self.persist_capture_settings().await
    }

    pub fn status(&self) -> BenchStatus {
        BenchStatus {
            plc_connected: self.reader.is_connected(),
            capture: self.capture_engine.status(),
            status_cache: self.status_cache.status(),
        }
    }

    async fn persist_capture_settings(&self) -> AppResult<()> {
        let settings = CaptureSettings {
            enabled: self.is_enabled(),
            polling_interval_ms: self.get_polling_interval_ms(),
        };
        self.settings_service.save_settings(&settings).await.map_err(|e| {
            crate::log_persistence_failure!("[SUPERVISOR] 保存采集设置失败: {}", e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::domain::ManualTicker;
    use crate::services::infrastructure::plc::MockTagReader;
    use crate::utils::time_utils::ManualClock;
    use chrono::Utc;
    use tempfile::TempDir;

    fn components(reader: &MockTagReader, settings_dir: &TempDir) -> BenchComponents {
        BenchComponents {
            reader: Arc::new(reader.clone()),
            store: Arc::new(InMemorySnapshotStore::new()),
            settings_service: Arc::new(JsonCaptureSettingsService::new(settings_dir.path())),
            resolver: Arc::new(ConventionalTagAddressResolver),
            clock: Arc::new(ManualClock::new(Utc::now())),
            capture_ticker: Arc::new(ManualTicker::new()),
            cache_ticker: Arc::new(ManualTicker::new()),
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.capture_config.monitored_groups = vec!["1.*.Current".to_string()];
        config.status_cache_config.blocks = vec![1];
        config
    }

    #[tokio::test]
    async fn test_settings_changes_survive_restart() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let reader = MockTagReader::new();
        let config = test_config();

        let supervisor = BenchSupervisor::assemble(&config, components(&reader, &dir)).await.unwrap();
        assert!(supervisor.is_enabled());
        assert_eq!(supervisor.get_polling_interval_ms(), 500);

        supervisor.set_polling_interval_ms(2000).await.unwrap();
        supervisor.set_enabled(false).await.unwrap();
        assert!(supervisor.set_polling_interval_ms(10).await.is_err());

        let restarted = BenchSupervisor::assemble(&config, components(&reader, &dir)).await.unwrap();
        assert!(!restarted.is_enabled());
        assert_eq!(restarted.get_polling_interval_ms(), 2000);
    }

    #[tokio::test]
    async fn test_start_and_stop_all_loops() {
        let dir = TempDir::new().unwrap();
        let reader = MockTagReader::new();
        let supervisor = BenchSupervisor::assemble(&test_config(), components(&reader, &dir)).await.unwrap();

        supervisor.start_all().await.unwrap();
        let status = supervisor.status();
        assert!(status.plc_connected);
        assert!(status.capture.running);
        assert!(status.status_cache.running);
        assert_eq!(status.capture.monitored_targets, 16);

        supervisor.stop_all().await.unwrap();
        assert!(!supervisor.capture_engine().is_running());
        assert!(!supervisor.status_cache().is_running());
    }

    #[tokio::test]
    async fn test_memory_store_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config();
        config.persistence_config.persistence_type = "memory".to_string();
        config.persistence_config.settings_dir = dir.path().to_path_buf();

        let supervisor = BenchSupervisor::from_config(&config, Arc::new(MockTagReader::new())).await.unwrap();
        assert!(supervisor.store().load_test_run("none").await.unwrap().is_none());

        config.persistence_config.persistence_type = "postgres".to_string();
        let result = BenchSupervisor::from_config(&config, Arc::new(MockTagReader::new())).await;
        assert!(matches!(result, Err(AppError::InvalidConfig { .. })));
    }
}
