// 文件: src/models/entities/test_run.rs
// 测试运行的SeaORM定义，阀门配置和参数集引用以JSON文本列保存

use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use crate::models::structs::{TestRun, ValveConfig};
use crate::utils::error::{AppError, AppResult};

/// 测试运行实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "test_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(column_type = "Text")]
    pub test_type: String,                   // Langzeittest / Detailtest / Einzeltest
    pub block_index: i32,
    #[sea_orm(column_type = "Text")]
    pub status: String,                      // 运行状态

    pub started_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub completed_at: Option<DateTime<Utc>>,

    #[sea_orm(column_type = "Text")]
    pub valve_configs_json: String,          // Vec<ValveConfig>
    #[sea_orm(column_type = "Text")]
    pub parameter_set_refs_json: String,     // Vec<String>

    pub valve_sperre: i32,                   // 阀门锁定掩码 (u16)
    #[sea_orm(column_type = "Text", nullable)]
    pub failure_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&TestRun> for ActiveModel {
    fn from(run: &TestRun) -> Self {
        let valve_configs_json = serde_json::to_string(&run.valve_configs)
            .unwrap_or_else(|_| "[]".to_string());
        let parameter_set_refs_json = serde_json::to_string(&run.parameter_set_refs)
            .unwrap_or_else(|_| "[]".to_string());

        Self {
            id: Set(run.id.clone()),
            test_type: Set(run.test_type.to_string()),
            block_index: Set(i32::from(run.block_index)),
            status: Set(run.status.to_string()),
            started_at: Set(run.started_at),
            completed_at: Set(run.completed_at),
            valve_configs_json: Set(valve_configs_json),
            parameter_set_refs_json: Set(parameter_set_refs_json),
            valve_sperre: Set(i32::from(run.valve_sperre)),
            failure_reason: Set(run.failure_reason.clone()),
        }
    }
}

impl TryFrom<&Model> for TestRun {
    type Error = AppError;

    fn try_from(model: &Model) -> AppResult<Self> {
        let valve_configs: Vec<ValveConfig> = serde_json::from_str(&model.valve_configs_json)?;
        let parameter_set_refs: Vec<String> = serde_json::from_str(&model.parameter_set_refs_json)?;

        Ok(TestRun {
            id: model.id.clone(),
            test_type: model.test_type.parse().map_err(|e: String| AppError::persistence_error(e))?,
            block_index: u8::try_from(model.block_index)
                .map_err(|_| AppError::persistence_error(format!("无效工位: {}", model.block_index)))?,
            status: model.status.parse().map_err(|e: String| AppError::persistence_error(e))?,
            started_at: model.started_at,
            completed_at: model.completed_at,
            valve_configs,
            parameter_set_refs,
            valve_sperre: u16::try_from(model.valve_sperre)
                .map_err(|_| AppError::persistence_error(format!("无效锁定掩码: {}", model.valve_sperre)))?,
            failure_reason: model.failure_reason.clone(),
        })
    }
}
