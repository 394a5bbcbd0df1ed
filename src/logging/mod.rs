//! # 日志记录模块 (Logging Module)
//!
//! ## 业务说明
//! 记录采集、状态缓存和测试运行过程中的事件，为故障排查和审计提供依据。
//!
//! ## 日志策略
//! - 各服务使用 `log` 宏并带组件标签，例如 `[CAPTURE]`、`[STATUS_CACHE]`、`[TEST_RUN]`
//! - 控制台输出由 `env_logger` 完成，级别来自配置文件，`RUST_LOG` 可覆盖
//! - 时间戳使用本地时间并精确到毫秒
//! - 核心问题（通讯失败、持久化失败、配置警告、用户操作）使用下方便捷宏统一前缀

use std::io::Write;

use crate::utils::config::LoggingConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::time_utils::log_timestamp;

/// 解析配置中的日志级别
pub fn parse_level(level: &str) -> AppResult<log::LevelFilter> {
    level
        .trim()
        .parse::<log::LevelFilter>()
        .map_err(|_| AppError::invalid_config(format!("未知的日志级别: {}", level)))
}

/// 初始化全局日志
///
/// 重复初始化时返回错误，调用方可以忽略。
pub fn init_logger(config: &LoggingConfig) -> AppResult<()> {
    let level = parse_level(&config.log_level)?;
    let show_module_path = config.show_module_path;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    // RUST_LOG 优先于配置文件
    builder.parse_default_env();
    builder.format(move |buf, record| {
        if show_module_path {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                log_timestamp(),
                record.level(),
                record.module_path().unwrap_or("-"),
                record.args()
            )
        } else {
            writeln!(buf, "{} {:<5} {}", log_timestamp(), record.level(), record.args())
        }
    });

    builder
        .try_init()
        .map_err(|e| AppError::generic(format!("日志系统初始化失败: {}", e)))?;
    log::info!("日志系统初始化完成，级别 {}", level);
    Ok(())
}

/// 便捷日志宏 - 记录核心问题日志

/// 记录通讯失败日志
#[macro_export]
macro_rules! log_communication_failure {
    ($msg:expr) => {
        log::error!("[通讯失败] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::error!("[通讯失败] {}", format!($msg, $($arg)*));
    };
}

/// 记录持久化失败日志
#[macro_export]
macro_rules! log_persistence_failure {
    ($msg:expr) => {
        log::error!("[持久化失败] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::error!("[持久化失败] {}", format!($msg, $($arg)*));
    };
}

/// 记录用户操作日志
#[macro_export]
macro_rules! log_user_operation {
    ($msg:expr) => {
        log::info!("[用户操作] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::info!("[用户操作] {}", format!($msg, $($arg)*));
    };
}

/// 记录用户配置操作警告
#[macro_export]
macro_rules! log_config_warning {
    ($msg:expr) => {
        log::warn!("[配置警告] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::warn!("[配置警告] {}", format!($msg, $($arg)*));
    };
}
