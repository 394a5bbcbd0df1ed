//! # 模型枚举类型模块
//!
//! ## 业务作用
//! 本模块定义了台架监控中使用的枚举类型：
//! - **测量类型**: 电流(Strom)、流量(Durchfluss)、力(Kraft)
//! - **测试类型**: 长时测试、详细测试、单阀测试
//! - **测试运行状态**: 运行生命周期状态机的各个状态
//!
//! 所有枚举都支持JSON序列化，并提供与字符串的双向转换。

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 测量类型
///
/// PLC中的标签使用德语名称（Strom/Durchfluss/Kraft），
/// 配置和日志中使用英文名称，两者在解析时都接受。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeasurementType {
    /// 电流
    Current,
    /// 流量
    Flow,
    /// 力
    Force,
}

impl MeasurementType {
    /// 全部测量类型，按固定顺序
    pub const ALL: [MeasurementType; 3] = [
        MeasurementType::Current,
        MeasurementType::Flow,
        MeasurementType::Force,
    ];

    /// PLC标签中使用的德语名称
    pub fn plc_name(&self) -> &'static str {
        match self {
            MeasurementType::Current => "Strom",
            MeasurementType::Flow => "Durchfluss",
            MeasurementType::Force => "Kraft",
        }
    }
}

impl Display for MeasurementType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MeasurementType::Current => "Current",
            MeasurementType::Flow => "Flow",
            MeasurementType::Force => "Force",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MeasurementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" | "strom" => Ok(MeasurementType::Current),
            "flow" | "durchfluss" => Ok(MeasurementType::Flow),
            "force" | "kraft" => Ok(MeasurementType::Force),
            _ => Err(format!("Invalid MeasurementType: {}", s)),
        }
    }
}

/// 测试类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestType {
    /// 长时耐久测试
    Langzeittest,
    /// 详细测试
    Detailtest,
    /// 单阀测试，必须恰好启用一个阀门
    Einzeltest,
}

impl Display for TestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestType::Langzeittest => "Langzeittest",
            TestType::Detailtest => "Detailtest",
            TestType::Einzeltest => "Einzeltest",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Langzeittest" => Ok(TestType::Langzeittest),
            "Detailtest" => Ok(TestType::Detailtest),
            "Einzeltest" => Ok(TestType::Einzeltest),
            _ => Err(format!("Invalid TestType: {}", s)),
        }
    }
}

/// 测试运行状态
///
/// `Initialized → Running → {Completed, Failed, Cancelled}`，后三者为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestRunStatus {
    Initialized,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TestRunStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestRunStatus::Completed | TestRunStatus::Failed | TestRunStatus::Cancelled
        )
    }
}

impl Default for TestRunStatus {
    fn default() -> Self {
        Self::Initialized
    }
}

impl Display for TestRunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestRunStatus::Initialized => "Initialized",
            TestRunStatus::Running => "Running",
            TestRunStatus::Completed => "Completed",
            TestRunStatus::Failed => "Failed",
            TestRunStatus::Cancelled => "Cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TestRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initialized" => Ok(TestRunStatus::Initialized),
            "Running" => Ok(TestRunStatus::Running),
            "Completed" => Ok(TestRunStatus::Completed),
            "Failed" => Ok(TestRunStatus::Failed),
            "Cancelled" => Ok(TestRunStatus::Cancelled),
            _ => Err(format!("Invalid TestRunStatus: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_type_parses_both_languages() {
        assert_eq!("Strom".parse::<MeasurementType>().unwrap(), MeasurementType::Current);
        assert_eq!("FLOW".parse::<MeasurementType>().unwrap(), MeasurementType::Flow);
        assert_eq!("kraft".parse::<MeasurementType>().unwrap(), MeasurementType::Force);
        assert!("Druck".parse::<MeasurementType>().is_err());
    }

    #[test]
    fn test_status_display_matches_from_str() {
        for status in [
            TestRunStatus::Initialized,
            TestRunStatus::Running,
            TestRunStatus::Completed,
            TestRunStatus::Failed,
            TestRunStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TestRunStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TestRunStatus::Initialized.is_terminal());
        assert!(!TestRunStatus::Running.is_terminal());
        assert!(TestRunStatus::Completed.is_terminal());
        assert!(TestRunStatus::Failed.is_terminal());
        assert!(TestRunStatus::Cancelled.is_terminal());
    }
}
