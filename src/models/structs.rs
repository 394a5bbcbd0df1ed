use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{MeasurementType, TestRunStatus, TestType};
use crate::utils::error::{AppError, AppResult};

/// 生成默认UUID字符串的辅助函数
pub fn default_id() -> String {
    Uuid::new_v4().to_string()
}

/// PLC标签值
///
/// 序列化为裸JSON值（布尔、整数、浮点、字符串），便于直接写入快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    /// 以无符号整数读取（计数器），负数或非数值返回 None
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TagValue::Int(v) if *v >= 0 => Some(*v as u64),
            TagValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as u64),
            TagValue::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TagValue::Int(v) => Some(*v),
            TagValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Float(v) => Some(*v),
            TagValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            TagValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// 转为JSON值
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TagValue::Bool(b) => serde_json::Value::Bool(*b),
            TagValue::Int(v) => serde_json::Value::from(*v),
            TagValue::Float(v) => serde_json::Value::from(*v),
            TagValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<u64> for TagValue {
    fn from(v: u64) -> Self {
        TagValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        TagValue::Int(i64::from(v))
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

/// 已采集的测量记录（不可变）
///
/// 自然标识为 (block, valve, type, counter)，同一标识重复保存是幂等的。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRecord {
    /// 自然键 `"{block}-{valve}-{type}-{counter}"`
    pub id: String,
    pub block_index: u8,
    pub valve_number: u8,
    pub measurement_type: MeasurementType,
    /// 触发本次采集的 DatenReady 计数器值
    pub counter_value: u64,
    /// 测量组数据，字段名对应PLC标签名
    pub payload: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

impl MeasurementRecord {
    /// 构造自然键
    pub fn natural_key(block: u8, valve: u8, measurement_type: MeasurementType, counter: u64) -> String {
        format!("{}-{}-{}-{}", block, valve, measurement_type, counter)
    }

    pub fn new(
        block_index: u8,
        valve_number: u8,
        measurement_type: MeasurementType,
        counter_value: u64,
        payload: serde_json::Value,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::natural_key(block_index, valve_number, measurement_type, counter_value),
            block_index,
            valve_number,
            measurement_type,
            counter_value,
            payload,
            captured_at,
        }
    }
}

/// 单个阀门在测试运行中的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValveConfig {
    /// 阀门编号 1..16
    pub valve_number: u8,
    pub enabled: bool,
    #[serde(default)]
    pub comment: Option<String>,
    /// 启动时读取的PLC计数器
    #[serde(default)]
    pub start_counter_value: Option<u64>,
    /// 结束时读取的PLC计数器，只在 stop/cancel/fail 时写入一次
    #[serde(default)]
    pub end_counter_value: Option<u64>,
}

impl ValveConfig {
    pub fn new(valve_number: u8, enabled: bool) -> Self {
        Self {
            valve_number,
            enabled,
            comment: None,
            start_counter_value: None,
            end_counter_value: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// 本次运行中该阀门的开关次数（结束计数 - 起始计数）
    ///
    /// 计数器在运行期间复位时返回 None。
    pub fn usage(&self) -> Option<u64> {
        match (self.start_counter_value, self.end_counter_value) {
            (Some(start), Some(end)) => end.checked_sub(start),
            _ => None,
        }
    }
}

/// 测试运行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    #[serde(default = "default_id")]
    pub id: String,
    pub test_type: TestType,
    pub block_index: u8,
    pub status: TestRunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub valve_configs: Vec<ValveConfig>,
    #[serde(default)]
    pub parameter_set_refs: Vec<String>,
    /// 阀门锁定掩码，置位表示禁用
    #[serde(default)]
    pub valve_sperre: u16,
    /// fail() 时记录的原因
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl TestRun {
    pub fn new(
        test_type: TestType,
        block_index: u8,
        valve_configs: Vec<ValveConfig>,
        parameter_set_refs: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: default_id(),
            test_type,
            block_index,
            status: TestRunStatus::Initialized,
            started_at,
            completed_at: None,
            valve_configs,
            parameter_set_refs,
            valve_sperre: 0,
            failure_reason: None,
        }
    }

    /// 启用的阀门
    pub fn enabled_valves(&self) -> impl Iterator<Item = &ValveConfig> {
        self.valve_configs.iter().filter(|v| v.enabled)
    }
}

/// 测试参数集
///
/// 类型化字段是唯一的数据来源；键值包 (`to_key_values`) 只是派生投影，
/// 通过 `to_key_values` / `from_key_values` 双向映射维护。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    #[serde(default = "default_id")]
    pub id: String,
    pub name: String,
    /// 供气压力（bar）
    pub air_pressure_bar: f64,
    /// 目标开关次数
    pub cycle_count: u64,
    /// 通电时间（毫秒）
    pub switch_on_ms: u64,
    /// 断电时间（毫秒）
    pub switch_off_ms: u64,
    /// 电流上限（安培）
    pub current_limit_a: f64,
    /// PLC测量模式
    pub mess_mode: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ParameterSet {
    const KEY_NAME: &'static str = "name";
    const KEY_AIR_PRESSURE: &'static str = "airPressureBar";
    const KEY_CYCLE_COUNT: &'static str = "cycleCount";
    const KEY_SWITCH_ON: &'static str = "switchOnMs";
    const KEY_SWITCH_OFF: &'static str = "switchOffMs";
    const KEY_CURRENT_LIMIT: &'static str = "currentLimitA";
    const KEY_MESS_MODE: &'static str = "messMode";
    const KEY_COMMENT: &'static str = "comment";

    /// 类型化字段 → 键值包
    pub fn to_key_values(&self) -> BTreeMap<String, String> {
        let mut bag = BTreeMap::new();
        bag.insert(Self::KEY_NAME.to_string(), self.name.clone());
        bag.insert(Self::KEY_AIR_PRESSURE.to_string(), self.air_pressure_bar.to_string());
        bag.insert(Self::KEY_CYCLE_COUNT.to_string(), self.cycle_count.to_string());
        bag.insert(Self::KEY_SWITCH_ON.to_string(), self.switch_on_ms.to_string());
        bag.insert(Self::KEY_SWITCH_OFF.to_string(), self.switch_off_ms.to_string());
        bag.insert(Self::KEY_CURRENT_LIMIT.to_string(), self.current_limit_a.to_string());
        bag.insert(Self::KEY_MESS_MODE.to_string(), self.mess_mode.to_string());
        if let Some(comment) = &self.comment {
            bag.insert(Self::KEY_COMMENT.to_string(), comment.clone());
        }
        bag
    }

    /// 键值包 → 类型化字段
    ///
    /// 缺失或无法解析的键返回验证错误；未知键被忽略。
    pub fn from_key_values(id: impl Into<String>, bag: &BTreeMap<String, String>) -> AppResult<Self> {
        fn required<'a>(bag: &'a BTreeMap<String, String>, key: &str) -> AppResult<&'a str> {
            bag.get(key)
                .map(String::as_str)
                .ok_or_else(|| AppError::validation_error(format!("参数集缺少字段: {}", key)))
        }
        fn parsed<T: std::str::FromStr>(bag: &BTreeMap<String, String>, key: &str) -> AppResult<T> {
            let raw = required(bag, key)?;
            raw.parse::<T>()
                .map_err(|_| AppError::validation_error(format!("参数集字段 {} 无法解析: '{}'", key, raw)))
        }

        Ok(Self {
            id: id.into(),
            name: required(bag, Self::KEY_NAME)?.to_string(),
            air_pressure_bar: parsed(bag, Self::KEY_AIR_PRESSURE)?,
            cycle_count: parsed(bag, Self::KEY_CYCLE_COUNT)?,
            switch_on_ms: parsed(bag, Self::KEY_SWITCH_ON)?,
            switch_off_ms: parsed(bag, Self::KEY_SWITCH_OFF)?,
            current_limit_a: parsed(bag, Self::KEY_CURRENT_LIMIT)?,
            mess_mode: parsed(bag, Self::KEY_MESS_MODE)?,
            comment: bag.get(Self::KEY_COMMENT).cloned(),
        })
    }
}

// ==================== 状态缓存快照 ====================

/// 全局PLC数据
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalData {
    pub battery_status: Option<TagValue>,
    pub general_errors: Option<TagValue>,
    #[serde(rename = "temperaturePLC")]
    pub temperature_plc: Option<TagValue>,
    pub version: Option<TagValue>,
}

/// 工位通用参数 (AllgemeineParameter)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralParameters {
    pub fehlerbit: Option<TagValue>,
    pub current_air_pressure: Option<TagValue>,
    pub current_air_flow: Option<TagValue>,
    pub current_force: Option<TagValue>,
    pub mess_mode: Option<TagValue>,
    pub operation_mode: Option<TagValue>,
}

/// 单个测量类型的状态标签
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementStatus {
    pub status: Option<TagValue>,
    #[serde(rename = "datenReady")]
    pub daten_ready: Option<TagValue>,
    #[serde(rename = "messID")]
    pub mess_id: Option<TagValue>,
}

/// 单个阀门的状态
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValveStatus {
    pub ventil_nr: u8,
    pub zaehler: Option<TagValue>,
    pub strom: Option<MeasurementStatus>,
    pub durchfluss: Option<MeasurementStatus>,
    pub kraft: Option<MeasurementStatus>,
}

impl ValveStatus {
    /// 按测量类型取状态
    pub fn measurement(&self, measurement_type: MeasurementType) -> Option<&MeasurementStatus> {
        match measurement_type {
            MeasurementType::Current => self.strom.as_ref(),
            MeasurementType::Flow => self.durchfluss.as_ref(),
            MeasurementType::Force => self.kraft.as_ref(),
        }
    }
}

/// 工位状态快照（不可变，整体替换发布）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub block_index: u8,
    pub last_updated: DateTime<Utc>,
    pub global_data: Option<GlobalData>,
    #[serde(rename = "allgemeineParameter")]
    pub general_parameters: Option<GeneralParameters>,
    pub ventil_data: Vec<ValveStatus>,
}
