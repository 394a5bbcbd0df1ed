// 文件: src/services/infrastructure/persistence/sqlite_orm_snapshot_store.rs
// 使用SeaORM和SQLite实现快照存储

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Schema,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::entities;
use crate::models::enums::MeasurementType;
use crate::models::structs::*;
use crate::services::traits::{BaseService, ISnapshotStore, SaveOutcome};
use crate::utils::error::{AppError, AppResult};

// 默认的SQLite数据库文件名
const DEFAULT_DB_FILE: &str = "valve_bench.sqlite";
// 数据库URL前缀
const SQLITE_URL_PREFIX: &str = "sqlite://";

/// 基于SeaORM和SQLite的快照存储
pub struct SqliteOrmSnapshotStore {
    db_conn: Arc<DatabaseConnection>,
    db_file_path: PathBuf,
}

impl SqliteOrmSnapshotStore {
    /// 创建新的存储实例，数据库文件不存在时自动创建
    ///
    /// * `db_path_opt` - SQLite数据库文件路径，None 时使用当前目录下的默认文件
    pub async fn new(db_path_opt: Option<&Path>) -> AppResult<Self> {
        let db_file_path = match db_path_opt {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir()?.join(DEFAULT_DB_FILE),
        };

        if let Some(parent_dir) = db_file_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                tokio::fs::create_dir_all(parent_dir).await.map_err(|e| {
                    AppError::io_error(format!("创建数据库目录失败: {:?}", parent_dir), e.kind().to_string())
                })?;
            }
        }

        let db_url = format!("{}{}?mode=rwc", SQLITE_URL_PREFIX, db_file_path.to_string_lossy());
        let conn = Database::connect(&db_url)
            .await
            .map_err(|db_err| AppError::persistence_error(format!("连接数据库失败: {}", db_err)))?;

        Self::setup_schema(&conn).await?;
        log::info!("🗄️ [SNAPSHOT_STORE] SQLite存储已就绪: {:?}", db_file_path);

        Ok(Self {
            db_conn: Arc::new(conn),
            db_file_path,
        })
    }

    /// 数据库文件路径
    pub fn db_file_path(&self) -> &Path {
        &self.db_file_path
    }

    /// 创建所有必要的表（如果不存在）
    async fn setup_schema(db: &DatabaseConnection) -> AppResult<()> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        let stmt_measurements = schema
            .create_table_from_entity(entities::measurement_snapshot::Entity)
            .if_not_exists()
            .to_owned();
        db.execute(backend.build(&stmt_measurements))
            .await
            .map_err(|e| AppError::persistence_error(format!("创建 measurement_snapshots 表失败: {}", e)))?;

        let stmt_test_runs = schema
            .create_table_from_entity(entities::test_run::Entity)
            .if_not_exists()
            .to_owned();
        db.execute(backend.build(&stmt_test_runs))
            .await
            .map_err(|e| AppError::persistence_error(format!("创建 test_runs 表失败: {}", e)))?;

        let stmt_parameter_sets = schema
            .create_table_from_entity(entities::parameter_set::Entity)
            .if_not_exists()
            .to_owned();
        db.execute(backend.build(&stmt_parameter_sets))
            .await
            .map_err(|e| AppError::persistence_error(format!("创建 parameter_sets 表失败: {}", e)))?;

        log::debug!("数据库表结构设置完成或已存在。");
        Ok(())
    }

    async fn measurement_exists(&self, id: &str) -> AppResult<bool> {
        let found = entities::measurement_snapshot::Entity::find_by_id(id.to_string())
            .one(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("查询测量记录失败: {}", e)))?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl BaseService for SqliteOrmSnapshotStore {
    fn service_name(&self) -> &'static str {
        "SqliteOrmSnapshotStore"
    }

    async fn health_check(&self) -> AppResult<()> {
        self.db_conn.ping().await.map_err(|db_err| {
            AppError::persistence_error(format!("数据库健康检查失败: {}", db_err))
        })?;
        Ok(())
    }
}

#[async_trait]
impl ISnapshotStore for SqliteOrmSnapshotStore {
    async fn save_measurement(&self, record: &MeasurementRecord) -> AppResult<SaveOutcome> {
        if self.measurement_exists(&record.id).await? {
            return Ok(SaveOutcome::DuplicateNoop(record.id.clone()));
        }

        let active_model: entities::measurement_snapshot::ActiveModel = record.into();
        match entities::measurement_snapshot::Entity::insert(active_model)
            .exec_without_returning(self.db_conn.as_ref())
            .await
        {
            Ok(_) => Ok(SaveOutcome::Inserted(record.id.clone())),
            Err(e) => {
                // 并发写入同一自然键时主键冲突，视为幂等
                if self.measurement_exists(&record.id).await? {
                    Ok(SaveOutcome::DuplicateNoop(record.id.clone()))
                } else {
                    Err(AppError::persistence_error(format!("保存测量记录失败: {}", e)))
                }
            }
        }
    }

    async fn latest_counter_value(
        &self,
        block: u8,
        valve: u8,
        measurement_type: MeasurementType,
    ) -> AppResult<Option<u64>> {
        use entities::measurement_snapshot::{Column, Entity};
        let latest = Entity::find()
            .filter(Column::BlockIndex.eq(i32::from(block)))
            .filter(Column::ValveNumber.eq(i32::from(valve)))
            .filter(Column::MeasurementType.eq(measurement_type.to_string()))
            .order_by_desc(Column::CounterValue)
            .one(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("查询最新计数器失败: {}", e)))?;
        Ok(latest.and_then(|m| u64::try_from(m.counter_value).ok()))
    }

    async fn load_measurements(
        &self,
        block: u8,
        valve: Option<u8>,
        measurement_type: Option<MeasurementType>,
    ) -> AppResult<Vec<MeasurementRecord>> {
        use entities::measurement_snapshot::{Column, Entity};
        let mut query = Entity::find().filter(Column::BlockIndex.eq(i32::from(block)));
        if let Some(valve) = valve {
            query = query.filter(Column::ValveNumber.eq(i32::from(valve)));
        }
        if let Some(measurement_type) = measurement_type {
            query = query.filter(Column::MeasurementType.eq(measurement_type.to_string()));
        }
        let models = query
            .order_by_asc(Column::ValveNumber)
            .order_by_asc(Column::MeasurementType)
            .order_by_asc(Column::CounterValue)
            .all(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("加载测量记录失败: {}", e)))?;
        models.iter().map(MeasurementRecord::try_from).collect()
    }

    async fn save_test_run(&self, run: &TestRun) -> AppResult<String> {
        let active_model: entities::test_run::ActiveModel = run.into();
        entities::test_run::Entity::insert(active_model)
            .exec_without_returning(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("保存测试运行失败: {}", e)))?;
        Ok(run.id.clone())
    }

    async fn update_test_run(&self, run: &TestRun) -> AppResult<()> {
        let active_model: entities::test_run::ActiveModel = run.into();
        active_model
            .update(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("更新测试运行 {} 失败: {}", run.id, e)))?;
        Ok(())
    }

    async fn load_test_run(&self, run_id: &str) -> AppResult<Option<TestRun>> {
        let model = entities::test_run::Entity::find_by_id(run_id.to_string())
            .one(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("加载测试运行失败: {}", e)))?;
        model.as_ref().map(TestRun::try_from).transpose()
    }

    async fn load_test_runs_by_block(&self, block: u8) -> AppResult<Vec<TestRun>> {
        use entities::test_run::{Column, Entity};
        let models = Entity::find()
            .filter(Column::BlockIndex.eq(i32::from(block)))
            .order_by_asc(Column::StartedAt)
            .all(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("加载工位测试运行失败: {}", e)))?;
        models.iter().map(TestRun::try_from).collect()
    }

    async fn save_parameter_set(&self, set: &ParameterSet) -> AppResult<()> {
        let exists = entities::parameter_set::Entity::find_by_id(set.id.clone())
            .one(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("查询参数集失败: {}", e)))?
            .is_some();

        let active_model: entities::parameter_set::ActiveModel = set.into();
        let result = if exists {
            active_model.update(self.db_conn.as_ref()).await.map(|_| ())
        } else {
            entities::parameter_set::Entity::insert(active_model)
                .exec_without_returning(self.db_conn.as_ref())
                .await
                .map(|_| ())
        };
        result.map_err(|e| AppError::persistence_error(format!("保存参数集失败: {}", e)))
    }

    async fn load_parameter_set(&self, id: &str) -> AppResult<Option<ParameterSet>> {
        let model = entities::parameter_set::Entity::find_by_id(id.to_string())
            .one(self.db_conn.as_ref())
            .await
            .map_err(|e| AppError::persistence_error(format!("加载参数集失败: {}", e)))?;
        model.as_ref().map(ParameterSet::try_from).transpose()
    }
}
