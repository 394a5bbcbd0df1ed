use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序统一错误类型
/// 用于封装台架监控系统中可能出现的各种错误，提供统一的错误处理机制
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppError {
    /// 通用错误，包含错误消息
    #[error("通用错误: {message}")]
    Generic { message: String },

    /// 输入/输出错误
    #[error("IO错误: {message} (Kind: {kind})")]
    IoError { message: String, kind: String },

    /// PLC连接性错误
    ///
    /// **业务含义**: PLC当前不可达或连接已断开
    /// **错误恢复**:
    /// - 采集循环整体跳过，仅置位连接状态标志
    /// - 重新连接后自动恢复，无需人工干预
    #[error("PLC连接错误: {message}")]
    ConnectivityError { message: String },

    /// 单个节点读取失败
    ///
    /// 影响范围仅限于该节点所属的 (block, valve, type) 三元组或快照字段
    #[error("节点读取错误: {node_id} - {message}")]
    NodeReadError { node_id: String, message: String },

    /// 数据持久化相关错误
    #[error("持久化错误: {message}")]
    PersistenceError { message: String },

    /// 无效配置（被拒绝，保留原有配置）
    #[error("无效配置: {message}")]
    InvalidConfig { message: String },

    /// 非法状态转换（被拒绝，状态不变）
    #[error("非法状态转换: 从 {from_state} 到 {to_state} - {message}")]
    InvalidTransition {
        from_state: String,
        to_state: String,
        message: String,
    },

    /// 验证错误（数据验证失败）
    #[error("验证错误: {message}")]
    ValidationError { message: String },

    /// 并发/异步操作错误
    #[error("并发错误: {message}")]
    ConcurrencyError { message: String },

    /// 资源未找到错误
    #[error("资源未找到: {resource_type} - {message}")]
    NotFoundError {
        resource_type: String,
        message: String,
    },

    /// 业务逻辑错误
    #[error("业务逻辑错误: {message}")]
    BusinessLogicError { message: String },

    /// JSON序列化/反序列化错误
    #[error("JSON序列化/反序列化错误: {message}")]
    JsonError { message: String },
}

impl AppError {
    /// 创建通用错误
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// 创建IO错误
    pub fn io_error(message: impl Into<String>, kind_str: impl Into<String>) -> Self {
        Self::IoError {
            message: message.into(),
            kind: kind_str.into(),
        }
    }

    /// 创建PLC连接错误
    ///
    /// **使用示例**:
    /// ```rust
    /// use valve_bench_lib::utils::error::AppError;
    /// let err = AppError::connectivity_error("PLC未连接");
    /// assert_eq!(err.error_code(), "CONNECTIVITY_ERROR");
    /// ```
    pub fn connectivity_error(message: impl Into<String>) -> Self {
        Self::ConnectivityError {
            message: message.into(),
        }
    }

    /// 创建节点读取错误
    pub fn node_read_error(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeReadError {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// 创建持久化错误
    pub fn persistence_error(message: impl Into<String>) -> Self {
        Self::PersistenceError {
            message: message.into(),
        }
    }

    /// 创建无效配置错误
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// 创建非法状态转换错误
    pub fn invalid_transition(
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            from_state: from_state.into(),
            to_state: to_state.into(),
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// 创建并发错误
    pub fn concurrency_error(message: impl Into<String>) -> Self {
        Self::ConcurrencyError {
            message: message.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found_error(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFoundError {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    /// 创建业务逻辑错误
    pub fn business_logic_error(message: impl Into<String>) -> Self {
        Self::BusinessLogicError {
            message: message.into(),
        }
    }

    /// 创建JSON序列化错误
    pub fn json_error(message: impl Into<String>) -> Self {
        Self::JsonError {
            message: message.into(),
        }
    }

    /// 获取错误的简短描述
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Generic { .. } => "GENERIC",
            AppError::IoError { .. } => "IO_ERROR",
            AppError::ConnectivityError { .. } => "CONNECTIVITY_ERROR",
            AppError::NodeReadError { .. } => "NODE_READ_ERROR",
            AppError::PersistenceError { .. } => "PERSISTENCE_ERROR",
            AppError::InvalidConfig { .. } => "INVALID_CONFIG",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
            AppError::ConcurrencyError { .. } => "CONCURRENCY_ERROR",
            AppError::NotFoundError { .. } => "NOT_FOUND_ERROR",
            AppError::BusinessLogicError { .. } => "BUSINESS_LOGIC_ERROR",
            AppError::JsonError { .. } => "JSON_ERROR",
        }
    }

    /// 是否为可恢复错误
    ///
    /// 计数器映射损坏走 panic 路径，不经过 AppError，因此这里所有变体都可恢复；
    /// 仅IO错误视为需要人工介入。
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AppError::IoError { .. })
    }
}

/// 标准 I/O 错误到 AppError 的转换
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError { message: err.to_string(), kind: format!("{:?}", err.kind()) }
    }
}

/// serde_json 错误到 AppError 的转换
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::JsonError { message: err.to_string() }
    }
}

/// SeaORM 数据库错误统一视为持久化错误
impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::PersistenceError { message: format!("数据库错误: {}", err) }
    }
}

/// config 加载错误视为无效配置
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::InvalidConfig { message: format!("配置加载失败: {}", err) }
    }
}

/// 字符串错误到 AppError 的转换（通用错误）
impl From<String> for AppError {
    fn from(err_msg: String) -> Self {
        Self::Generic { message: err_msg }
    }
}

/// &str 错误到 AppError 的转换（通用错误）
impl From<&str> for AppError {
    fn from(err_msg: &str) -> Self {
        Self::Generic { message: err_msg.to_string() }
    }
}

/// 应用程序结果类型别名
/// 简化错误处理的类型定义
pub type AppResult<T> = Result<T, AppError>;
