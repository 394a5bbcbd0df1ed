use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::models::enums::MeasurementType;
use crate::utils::error::{AppError, AppResult};

/// 采集/刷新周期的最小值（毫秒）
pub const MIN_POLLING_INTERVAL_MS: u64 = 100;

/// 台架工位编号范围
pub const MIN_BLOCK_INDEX: u8 = 1;
pub const MAX_BLOCK_INDEX: u8 = 4;

/// 每个工位的阀门数量
pub const VALVES_PER_BLOCK: u8 = 16;

/// 环境变量前缀，例如 `VALVE_BENCH__CAPTURE_CONFIG__POLLING_INTERVAL_MS=500`
pub const ENV_PREFIX: &str = "VALVE_BENCH";

/// 应用程序主配置结构
/// 包含台架监控运行所需的所有配置信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 应用程序基本设置
    pub app_settings: AppSettings,
    /// PLC连接配置
    pub plc_config: PlcConfig,
    /// 测量采集引擎配置
    pub capture_config: CaptureConfig,
    /// 状态缓存配置
    pub status_cache_config: StatusCacheConfig,
    /// 测试运行配置
    pub test_run_config: TestRunConfig,
    /// 日志配置
    pub logging_config: LoggingConfig,
    /// 数据存储配置
    pub persistence_config: PersistenceConfig,
}

/// 应用程序基本设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 应用程序名称
    pub app_name: String,
    /// 运行环境 (development, testing, production)
    pub environment: String,
    /// 是否使用模拟台架（无真实PLC时）
    pub simulate_bench: bool,
}

/// PLC连接配置
///
/// 协议客户端本身由外部提供，这里只保留与连接标识和读取超时相关的参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    /// PLC端点，例如 `opc.tcp://192.168.0.10:4840`
    pub endpoint: String,
    /// 单次读取超时时间（毫秒）
    pub read_timeout_ms: u64,
}

/// 测量采集引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 是否启用采集
    pub enabled: bool,
    /// 轮询周期（毫秒），不得小于100
    pub polling_interval_ms: u64,
    /// 监控的测量组，格式 `<block>.<valve>.<type>`，block/valve 可为 `*`
    pub monitored_groups: Vec<String>,
    /// 单周期软截止时间（毫秒），None 表示不限制
    pub cycle_soft_deadline_ms: Option<u64>,
}

/// 状态缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusCacheConfig {
    /// 是否启用状态缓存
    pub enabled: bool,
    /// 刷新周期（毫秒），不得小于100
    pub refresh_interval_ms: u64,
    /// 需要缓存的工位列表
    pub blocks: Vec<u8>,
}

/// 测试运行配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestRunConfig {
    /// 启动测试时是否将阀门锁定掩码写入PLC
    ///
    /// 掩码约定为"置位即禁用"，接入真实PLC前需确认硬件约定，故默认关闭。
    pub write_valve_sperre_on_start: bool,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 是否在日志中输出模块路径
    pub show_module_path: bool,
}

/// 数据持久化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// 持久化类型 (sqlite, memory)
    pub persistence_type: String,
    /// 数据目录
    pub data_path: PathBuf,
    /// SQLite数据库文件名
    pub database_file: String,
    /// 运行时设置文件目录
    pub settings_dir: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "ValveBench".to_string(),
            environment: "development".to_string(),
            simulate_bench: true,
        }
    }
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            endpoint: "opc.tcp://127.0.0.1:4840".to_string(),
            read_timeout_ms: 1000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval_ms: 500,
            monitored_groups: vec!["*.*.Current".to_string()],
            cycle_soft_deadline_ms: None,
        }
    }
}

impl Default for StatusCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_ms: 1000,
            blocks: vec![1, 2, 3, 4],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            show_module_path: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            persistence_type: "sqlite".to_string(),
            data_path: PathBuf::from("data"),
            database_file: "valve_bench.sqlite".to_string(),
            settings_dir: PathBuf::from("config"),
        }
    }
}

impl PersistenceConfig {
    /// SQLite 连接串
    pub fn database_url(&self) -> String {
        let db_path = self.data_path.join(&self.database_file);
        format!("sqlite://{}?mode=rwc", db_path.display())
    }
}

/// 采集目标三元组 (block, valve, type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub block: u8,
    pub valve: u8,
    pub measurement_type: MeasurementType,
}

impl std::fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.block, self.valve, self.measurement_type)
    }
}

/// 解析单个测量组表达式
fn parse_range(part: &str, min: u8, max: u8, what: &str, group: &str) -> AppResult<Vec<u8>> {
    if part == "*" {
        return Ok((min..=max).collect());
    }
    let value: u8 = part.parse().map_err(|_| {
        AppError::invalid_config(format!("测量组 '{}' 中的{}无效: '{}'", group, what, part))
    })?;
    if value < min || value > max {
        return Err(AppError::invalid_config(format!(
            "测量组 '{}' 中的{} {} 超出范围 {}..={}",
            group, what, value, min, max
        )));
    }
    Ok(vec![value])
}

/// 将监控组字符串展开为有序、去重的三元组列表
///
/// 例如 `"1.*.Current"` 展开为工位1上16个阀门的电流测量。
pub fn expand_monitored_groups(groups: &[String]) -> AppResult<Vec<CaptureTarget>> {
    let mut targets = std::collections::BTreeSet::new();
    for group in groups {
        let parts: Vec<&str> = group.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(AppError::invalid_config(format!(
                "测量组 '{}' 格式无效，应为 <block>.<valve>.<type>",
                group
            )));
        }
        let blocks = parse_range(parts[0], MIN_BLOCK_INDEX, MAX_BLOCK_INDEX, "工位", group)?;
        let valves = parse_range(parts[1], 1, VALVES_PER_BLOCK, "阀门", group)?;
        let types: Vec<MeasurementType> = if parts[2] == "*" {
            MeasurementType::ALL.to_vec()
        } else {
            vec![parts[2]
                .parse::<MeasurementType>()
                .map_err(|e| AppError::invalid_config(format!("测量组 '{}': {}", group, e)))?]
        };
        for &block in &blocks {
            for &valve in &valves {
                for &measurement_type in &types {
                    targets.insert(CaptureTarget { block, valve, measurement_type });
                }
            }
        }
    }
    Ok(targets.into_iter().collect())
}

/// 校验轮询周期
pub fn validate_polling_interval(interval_ms: u64) -> AppResult<()> {
    if interval_ms < MIN_POLLING_INTERVAL_MS {
        return Err(AppError::invalid_config(format!(
            "轮询周期 {}ms 小于最小值 {}ms",
            interval_ms, MIN_POLLING_INTERVAL_MS
        )));
    }
    Ok(())
}

/// 校验工位编号
pub fn validate_block_index(block: u8) -> AppResult<()> {
    if !(MIN_BLOCK_INDEX..=MAX_BLOCK_INDEX).contains(&block) {
        return Err(AppError::validation_error(format!(
            "工位编号 {} 超出范围 {}..={}",
            block, MIN_BLOCK_INDEX, MAX_BLOCK_INDEX
        )));
    }
    Ok(())
}

/// 配置管理器
/// 负责加载、保存和校验应用程序配置
pub struct ConfigManager {
    config: AppConfig,
    config_file_path: PathBuf,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_file_path: PathBuf) -> Self {
        Self {
            config: AppConfig::default(),
            config_file_path,
        }
    }

    /// 使用已有配置创建管理器（测试和嵌入场景）
    pub fn with_config(config_file_path: PathBuf, config: AppConfig) -> Self {
        Self { config, config_file_path }
    }

    /// 加载配置：文件（可选）+ 环境变量覆盖
    ///
    /// 文件不存在时写出默认配置。环境变量格式为
    /// `VALVE_BENCH__<SECTION>__<KEY>`，例如 `VALVE_BENCH__LOGGING_CONFIG__LOG_LEVEL=debug`。
    pub async fn load(&mut self) -> AppResult<()> {
        if !self.config_file_path.exists() {
            log::info!("配置文件不存在，写出默认配置: {:?}", self.config_file_path);
            self.save_to_file().await?;
        }

        self.config = Self::build_layered(&self.config_file_path)?;
        self.validate_config()?;
        Ok(())
    }

    fn build_layered(path: &Path) -> AppResult<AppConfig> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("capture_config.monitored_groups")
                    .with_list_parse_key("status_cache_config.blocks"),
            )
            .build()?;
        Ok(settings.try_deserialize::<AppConfig>()?)
    }

    /// 将配置保存到文件
    pub async fn save_to_file(&self) -> AppResult<()> {
        if let Some(parent) = self.config_file_path.parent() {
            tokio::fs::create_dir_all(parent).await
                .map_err(|e| AppError::io_error(format!("创建配置目录失败: {}", e), e.kind().to_string()))?;
        }

        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| AppError::json_error(format!("序列化配置失败: {}", e)))?;

        tokio::fs::write(&self.config_file_path, content)
            .await
            .map_err(|e| AppError::io_error(format!("写入配置文件失败: {}", e), e.kind().to_string()))?;

        Ok(())
    }

    /// 获取配置的只读引用
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取配置的可变引用
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// 验证配置的有效性
    pub fn validate_config(&self) -> AppResult<()> {
        validate_config(&self.config)
    }
}

/// 验证配置的有效性
pub fn validate_config(config: &AppConfig) -> AppResult<()> {
    validate_polling_interval(config.capture_config.polling_interval_ms)?;
    validate_polling_interval(config.status_cache_config.refresh_interval_ms)?;
    expand_monitored_groups(&config.capture_config.monitored_groups)?;

    for &block in &config.status_cache_config.blocks {
        validate_block_index(block).map_err(|e| AppError::invalid_config(e.to_string()))?;
    }

    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&config.logging_config.log_level.as_str()) {
        return Err(AppError::invalid_config(format!(
            "无效的日志级别: {}，有效值: {:?}",
            config.logging_config.log_level, valid_log_levels
        )));
    }

    let valid_persistence_types = ["sqlite", "memory"];
    if !valid_persistence_types.contains(&config.persistence_config.persistence_type.as_str()) {
        return Err(AppError::invalid_config(format!(
            "无效的持久化类型: {}，有效值: {:?}",
            config.persistence_config.persistence_type, valid_persistence_types
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_expand_wildcard_groups() {
        let targets = expand_monitored_groups(&["1.*.Current".to_string()]).unwrap();
        assert_eq!(targets.len(), 16);
        assert!(targets.iter().all(|t| t.block == 1 && t.measurement_type == MeasurementType::Current));
        assert_eq!(targets[0].valve, 1);
        assert_eq!(targets[15].valve, 16);
    }

    #[test]
    fn test_expand_accepts_german_type_names_and_dedups() {
        let targets = expand_monitored_groups(&[
            "2.3.Durchfluss".to_string(),
            "2.3.flow".to_string(),
        ])
        .unwrap();
        assert_eq!(targets, vec![CaptureTarget { block: 2, valve: 3, measurement_type: MeasurementType::Flow }]);
    }

    #[test]
    fn test_expand_rejects_bad_groups() {
        for bad in ["5.1.Current", "1.17.Flow", "1.1", "1.1.Pressure", "x.1.Force"] {
            let err = expand_monitored_groups(&[bad.to_string()]).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_CONFIG", "应拒绝 {}", bad);
        }
    }

    #[test]
    fn test_polling_interval_floor() {
        assert!(validate_polling_interval(99).is_err());
        assert!(validate_polling_interval(100).is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_load_writes_default_then_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app_config.json");

        let mut manager = ConfigManager::new(path.clone());
        manager.load().await.unwrap();
        assert!(path.exists());
        assert_eq!(manager.get_config().capture_config.polling_interval_ms, 500);

        manager.get_config_mut().capture_config.polling_interval_ms = 250;
        manager.get_config_mut().status_cache_config.blocks = vec![2];
        manager.save_to_file().await.unwrap();

        let mut reloaded = ConfigManager::new(path);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get_config().capture_config.polling_interval_ms, 250);
        assert_eq!(reloaded.get_config().status_cache_config.blocks, vec![2]);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        tokio::fs::write(&path, r#"{"capture_config": {"polling_interval_ms": 50}}"#)
            .await
            .unwrap();

        let mut manager = ConfigManager::new(path);
        let err = manager.load().await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}
