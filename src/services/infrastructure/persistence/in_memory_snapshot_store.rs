/// 内存快照存储
///
/// 用于开发、模拟台架和测试。支持注入保存失败，以验证
/// "保存失败不推进计数器、下个周期重试"的行为。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::models::enums::MeasurementType;
use crate::models::structs::*;
use crate::services::traits::{BaseService, ISnapshotStore, SaveOutcome};
use crate::utils::error::{AppError, AppResult};

#[derive(Default)]
pub struct InMemorySnapshotStore {
    measurements: RwLock<HashMap<String, MeasurementRecord>>,
    test_runs: RwLock<HashMap<String, TestRun>>,
    parameter_sets: RwLock<HashMap<String, ParameterSet>>,
    /// 接下来 N 次 save_measurement 失败
    failing_saves: AtomicU32,
    /// 接下来 N 次 update_test_run 失败
    failing_updates: AtomicU32,
    /// 是否拒绝所有写入
    reject_all_writes: AtomicBool,
    save_attempts: AtomicU64,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来 `count` 次测量保存失败
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// 让接下来 `count` 次测试运行更新失败
    pub fn fail_next_updates(&self, count: u32) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    pub fn reject_all_writes(&self, reject: bool) {
        self.reject_all_writes.store(reject, Ordering::SeqCst);
    }

    /// save_measurement 的调用次数（含失败和重复）
    pub fn save_attempts(&self) -> u64 {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// 已保存的测量记录数
    pub async fn measurement_count(&self) -> usize {
        self.measurements.read().await.len()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_writable(&self, what: &str) -> AppResult<()> {
        if self.reject_all_writes.load(Ordering::SeqCst) {
            return Err(AppError::persistence_error(format!("存储拒绝写入: {}", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl BaseService for InMemorySnapshotStore {
    fn service_name(&self) -> &'static str {
        "InMemorySnapshotStore"
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ISnapshotStore for InMemorySnapshotStore {
    async fn save_measurement(&self, record: &MeasurementRecord) -> AppResult<SaveOutcome> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_writable("测量记录")?;
        if Self::take_failure(&self.failing_saves) {
            return Err(AppError::persistence_error(format!("模拟保存失败: {}", record.id)));
        }

        let mut measurements = self.measurements.write().await;
        if measurements.contains_key(&record.id) {
            return Ok(SaveOutcome::DuplicateNoop(record.id.clone()));
        }
        measurements.insert(record.id.clone(), record.clone());
        Ok(SaveOutcome::Inserted(record.id.clone()))
    }

    async fn latest_counter_value(
        &self,
        block: u8,
        valve: u8,
        measurement_type: MeasurementType,
    ) -> AppResult<Option<u64>> {
        let measurements = self.measurements.read().await;
        Ok(measurements
            .values()
            .filter(|r| r.block_index == block && r.valve_number == valve && r.measurement_type == measurement_type)
            .map(|r| r.counter_value)
            .max())
    }

    async fn load_measurements(
        &self,
        block: u8,
        valve: Option<u8>,
        measurement_type: Option<MeasurementType>,
    ) -> AppResult<Vec<MeasurementRecord>> {
        let measurements = self.measurements.read().await;
        let mut records: Vec<MeasurementRecord> = measurements
            .values()
            .filter(|r| r.block_index == block)
            .filter(|r| valve.map_or(true, |v| r.valve_number == v))
            .filter(|r| measurement_type.map_or(true, |t| r.measurement_type == t))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.valve_number, r.measurement_type, r.counter_value));
        Ok(records)
    }

    async fn save_test_run(&self, run: &TestRun) -> AppResult<String> {
        self.check_writable("测试运行")?;
        let mut runs = self.test_runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(AppError::persistence_error(format!("测试运行已存在: {}", run.id)));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(run.id.clone())
    }

    async fn update_test_run(&self, run: &TestRun) -> AppResult<()> {
        self.check_writable("测试运行")?;
        if Self::take_failure(&self.failing_updates) {
            return Err(AppError::persistence_error(format!("模拟更新失败: {}", run.id)));
        }
        let mut runs = self.test_runs.write().await;
        match runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(AppError::not_found_error("TestRun", run.id.clone())),
        }
    }

    async fn load_test_run(&self, run_id: &str) -> AppResult<Option<TestRun>> {
        Ok(self.test_runs.read().await.get(run_id).cloned())
    }

    async fn load_test_runs_by_block(&self, block: u8) -> AppResult<Vec<TestRun>> {
        let runs = self.test_runs.read().await;
        let mut result: Vec<TestRun> = runs.values().filter(|r| r.block_index == block).cloned().collect();
        result.sort_by_key(|r| r.started_at);
        Ok(result)
    }

    async fn save_parameter_set(&self, set: &ParameterSet) -> AppResult<()> {
        self.check_writable("参数集")?;
        self.parameter_sets.write().await.insert(set.id.clone(), set.clone());
        Ok(())
    }

    async fn load_parameter_set(&self, id: &str) -> AppResult<Option<ParameterSet>> {
        Ok(self.parameter_sets.read().await.get(id).cloned())
    }
}
