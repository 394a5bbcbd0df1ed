/// 标签地址解析
///
/// 真实部署中节点ID由外部配置文件映射得到；这里定义注入接缝，
/// 并提供与台架PLC程序一致的默认命名约定：
///
/// - `Block{b}.Ventil{v}.{Strom|Durchfluss|Kraft}.{DatenReady|Status|MessID|...}`
/// - `Block{b}.Ventil{v}.Zaehler`
/// - `Block{b}.VentilSperre`
/// - `Block{b}.AllgemeineParameter.{Fehlerbit|CurrentAirPressure|...}`
/// - `Global.{BatteryStatus|GeneralErrors|TemperaturePLC|Version}`

use crate::models::enums::MeasurementType;

/// 状态缓存中每个测量类型读取的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusField {
    Status,
    DatenReady,
    MessId,
}

impl StatusField {
    pub const ALL: [StatusField; 3] = [StatusField::Status, StatusField::DatenReady, StatusField::MessId];

    fn tag_name(&self) -> &'static str {
        match self {
            StatusField::Status => "Status",
            StatusField::DatenReady => "DatenReady",
            StatusField::MessId => "MessID",
        }
    }
}

/// 全局数据字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalField {
    BatteryStatus,
    GeneralErrors,
    TemperaturePlc,
    Version,
}

impl GlobalField {
    pub const ALL: [GlobalField; 4] = [
        GlobalField::BatteryStatus,
        GlobalField::GeneralErrors,
        GlobalField::TemperaturePlc,
        GlobalField::Version,
    ];

    fn tag_name(&self) -> &'static str {
        match self {
            GlobalField::BatteryStatus => "BatteryStatus",
            GlobalField::GeneralErrors => "GeneralErrors",
            GlobalField::TemperaturePlc => "TemperaturePLC",
            GlobalField::Version => "Version",
        }
    }
}

/// 工位通用参数字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralParameterField {
    Fehlerbit,
    CurrentAirPressure,
    CurrentAirFlow,
    CurrentForce,
    MessMode,
    OperationMode,
}

impl GeneralParameterField {
    pub const ALL: [GeneralParameterField; 6] = [
        GeneralParameterField::Fehlerbit,
        GeneralParameterField::CurrentAirPressure,
        GeneralParameterField::CurrentAirFlow,
        GeneralParameterField::CurrentForce,
        GeneralParameterField::MessMode,
        GeneralParameterField::OperationMode,
    ];

    fn tag_name(&self) -> &'static str {
        match self {
            GeneralParameterField::Fehlerbit => "Fehlerbit",
            GeneralParameterField::CurrentAirPressure => "CurrentAirPressure",
            GeneralParameterField::CurrentAirFlow => "CurrentAirFlow",
            GeneralParameterField::CurrentForce => "CurrentForce",
            GeneralParameterField::MessMode => "MessMode",
            GeneralParameterField::OperationMode => "OperationMode",
        }
    }
}

/// 标签地址解析接口
pub trait ITagAddressResolver: Send + Sync {
    /// 测量完成计数器 (DatenReady)
    fn ready_counter(&self, block: u8, valve: u8, measurement_type: MeasurementType) -> String;

    /// 测量组：(负载中的字段名, 节点ID)
    fn measurement_group(&self, block: u8, valve: u8, measurement_type: MeasurementType) -> Vec<(String, String)>;

    /// 测量类型的状态字段
    fn status_field(&self, block: u8, valve: u8, measurement_type: MeasurementType, field: StatusField) -> String;

    /// 阀门开关次数计数器
    fn valve_counter(&self, block: u8, valve: u8) -> String;

    /// 阀门锁定掩码
    fn valve_sperre(&self, block: u8) -> String;

    fn global_field(&self, field: GlobalField) -> String;

    fn general_parameter(&self, block: u8, field: GeneralParameterField) -> String;
}

/// 默认命名约定
#[derive(Debug, Clone, Default)]
pub struct ConventionalTagAddressResolver;

impl ConventionalTagAddressResolver {
    fn measurement_prefix(block: u8, valve: u8, measurement_type: MeasurementType) -> String {
        format!("Block{}.Ventil{}.{}", block, valve, measurement_type.plc_name())
    }

    /// 各测量类型的组字段
    fn group_fields(measurement_type: MeasurementType) -> [&'static str; 4] {
        match measurement_type {
            MeasurementType::Current => ["MessID", "StromMax", "StromMittel", "Schaltzeit"],
            MeasurementType::Flow => ["MessID", "DurchflussMax", "DurchflussMittel", "Druck"],
            MeasurementType::Force => ["MessID", "KraftMax", "KraftMittel", "Weg"],
        }
    }
}

impl ITagAddressResolver for ConventionalTagAddressResolver {
    fn ready_counter(&self, block: u8, valve: u8, measurement_type: MeasurementType) -> String {
        format!("{}.DatenReady", Self::measurement_prefix(block, valve, measurement_type))
    }

    fn measurement_group(&self, block: u8, valve: u8, measurement_type: MeasurementType) -> Vec<(String, String)> {
        let prefix = Self::measurement_prefix(block, valve, measurement_type);
        Self::group_fields(measurement_type)
            .iter()
            .map(|field| (field.to_string(), format!("{}.{}", prefix, field)))
            .collect()
    }

    fn status_field(&self, block: u8, valve: u8, measurement_type: MeasurementType, field: StatusField) -> String {
        format!("{}.{}", Self::measurement_prefix(block, valve, measurement_type), field.tag_name())
    }

    fn valve_counter(&self, block: u8, valve: u8) -> String {
        format!("Block{}.Ventil{}.Zaehler", block, valve)
    }

    fn valve_sperre(&self, block: u8) -> String {
        format!("Block{}.VentilSperre", block)
    }

    fn global_field(&self, field: GlobalField) -> String {
        format!("Global.{}", field.tag_name())
    }

    fn general_parameter(&self, block: u8, field: GeneralParameterField) -> String {
        format!("Block{}.AllgemeineParameter.{}", block, field.tag_name())
    }
}
