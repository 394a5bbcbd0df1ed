// 文件: src/models/entities/measurement_snapshot.rs
// 已采集测量记录的SeaORM定义，自然键作为主键保证幂等写入

use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use crate::models::enums::MeasurementType;
use crate::models::structs::MeasurementRecord;
use crate::utils::error::{AppError, AppResult};

/// 测量快照实体
///
/// 记录一旦写入即不可变；同一 (block, valve, type, counter) 只存在一行。
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "measurement_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,                          // 自然键 "{block}-{valve}-{type}-{counter}"

    pub block_index: i32,                    // 工位
    pub valve_number: i32,                   // 阀门
    #[sea_orm(column_type = "Text")]
    pub measurement_type: String,            // Current / Flow / Force
    pub counter_value: i64,                  // DatenReady 计数器

    #[sea_orm(column_type = "Text")]
    pub payload_json: String,                // 测量组数据（JSON）

    pub captured_at: DateTime<Utc>,          // 采集时间
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&MeasurementRecord> for ActiveModel {
    fn from(record: &MeasurementRecord) -> Self {
        Self {
            id: Set(record.id.clone()),
            block_index: Set(i32::from(record.block_index)),
            valve_number: Set(i32::from(record.valve_number)),
            measurement_type: Set(record.measurement_type.to_string()),
            counter_value: Set(i64::try_from(record.counter_value).unwrap_or(i64::MAX)),
            payload_json: Set(record.payload.to_string()),
            captured_at: Set(record.captured_at),
        }
    }
}

impl TryFrom<&Model> for MeasurementRecord {
    type Error = AppError;

    fn try_from(model: &Model) -> AppResult<Self> {
        let measurement_type: MeasurementType = model
            .measurement_type
            .parse()
            .map_err(|e: String| AppError::persistence_error(e))?;
        Ok(MeasurementRecord {
            id: model.id.clone(),
            block_index: u8::try_from(model.block_index)
                .map_err(|_| AppError::persistence_error(format!("无效工位: {}", model.block_index)))?,
            valve_number: u8::try_from(model.valve_number)
                .map_err(|_| AppError::persistence_error(format!("无效阀门: {}", model.valve_number)))?,
            measurement_type,
            counter_value: u64::try_from(model.counter_value)
                .map_err(|_| AppError::persistence_error(format!("无效计数器: {}", model.counter_value)))?,
            payload: serde_json::from_str(&model.payload_json)?,
            captured_at: model.captured_at,
        })
    }
}
