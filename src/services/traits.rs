/// 服务层基础trait定义
/// 提供各层服务的接口规范，支持依赖注入和测试

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::utils::error::AppResult;
use crate::models::enums::MeasurementType;
use crate::models::structs::*;

/// 基础服务trait，所有服务都应实现
///
/// 服务通常以 `Arc<dyn ...>` 共享，因此生命周期方法只取 `&self`。
#[async_trait]
pub trait BaseService: Send + Sync {
    /// 服务名称
    fn service_name(&self) -> &'static str;

    /// 初始化服务
    async fn initialize(&self) -> AppResult<()> {
        Ok(())
    }

    /// 关闭服务
    async fn shutdown(&self) -> AppResult<()> {
        Ok(())
    }

    /// 健康检查
    async fn health_check(&self) -> AppResult<()>;
}

/// 测量保存结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveOutcome {
    /// 新写入的记录
    Inserted(String),
    /// 相同自然键已存在，本次保存为幂等空操作
    DuplicateNoop(String),
}

impl SaveOutcome {
    pub fn id(&self) -> &str {
        match self {
            SaveOutcome::Inserted(id) | SaveOutcome::DuplicateNoop(id) => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, SaveOutcome::DuplicateNoop(_))
    }
}

/// 快照存储服务trait
///
/// 测量记录只追加不修改；按 (block, valve, type, counter) 去重。
#[async_trait]
pub trait ISnapshotStore: BaseService {
    /// 保存测量记录
    async fn save_measurement(&self, record: &MeasurementRecord) -> AppResult<SaveOutcome>;

    /// 查询某个三元组已持久化的最大计数器值，用于重启后的基线
    async fn latest_counter_value(
        &self,
        block: u8,
        valve: u8,
        measurement_type: MeasurementType,
    ) -> AppResult<Option<u64>>;

    /// 按工位查询测量记录，按计数器升序
    async fn load_measurements(
        &self,
        block: u8,
        valve: Option<u8>,
        measurement_type: Option<MeasurementType>,
    ) -> AppResult<Vec<MeasurementRecord>>;

    /// 保存新的测试运行
    async fn save_test_run(&self, run: &TestRun) -> AppResult<String>;

    /// 更新已有测试运行
    async fn update_test_run(&self, run: &TestRun) -> AppResult<()>;

    /// 加载测试运行
    async fn load_test_run(&self, run_id: &str) -> AppResult<Option<TestRun>>;

    /// 加载工位的全部测试运行
    async fn load_test_runs_by_block(&self, block: u8) -> AppResult<Vec<TestRun>>;

    /// 保存（插入或覆盖）参数集
    async fn save_parameter_set(&self, set: &ParameterSet) -> AppResult<()>;

    /// 加载参数集
    async fn load_parameter_set(&self, id: &str) -> AppResult<Option<ParameterSet>>;
}
