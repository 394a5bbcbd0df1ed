// 文件: src/models/entities/parameter_set.rs
// 测试参数集的SeaORM定义，持久化的是键值包投影

use std::collections::BTreeMap;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use crate::models::structs::ParameterSet;
use crate::utils::error::{AppError, AppResult};

/// 参数集实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "parameter_sets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub values_json: String,                 // BTreeMap<String, String>
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&ParameterSet> for ActiveModel {
    fn from(set: &ParameterSet) -> Self {
        let values_json = serde_json::to_string(&set.to_key_values())
            .unwrap_or_else(|_| "{}".to_string());
        Self {
            id: Set(set.id.clone()),
            name: Set(set.name.clone()),
            values_json: Set(values_json),
            updated_at: Set(Utc::now()),
        }
    }
}

impl TryFrom<&Model> for ParameterSet {
    type Error = AppError;

    fn try_from(model: &Model) -> AppResult<Self> {
        let bag: BTreeMap<String, String> = serde_json::from_str(&model.values_json)?;
        ParameterSet::from_key_values(model.id.clone(), &bag)
    }
}
