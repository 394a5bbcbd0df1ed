//! # 测试运行生命周期 (Test Run Lifecycle)
//!
//! 状态机：`Initialized → Running → {Completed, Failed, Cancelled}`，终态不可再转换。
//!
//! - `start` 校验阀门配置，清空调用方传入的计数器，读取每个启用阀门的开关计数器作为起始值，
//!   一次性以 `Running` 持久化；保存失败时不留下任何记录
//! - `stop` / `cancel` / `fail` 只允许从 `Running` 出发，读取结束计数器后进入终态；
//!   单个计数器读取失败只让该阀门的结束值为空，状态照常转换
//! - 所有操作串行执行，持久化成功后才更新内存中的运行表

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::enums::{TestRunStatus, TestType};
use crate::models::structs::{TagValue, TestRun, ValveConfig};
use crate::services::domain::valve_sperre::valve_sperre_from_configs;
use crate::services::infrastructure::plc::{ITagAddressResolver, ITagReader};
use crate::services::traits::ISnapshotStore;
use crate::utils::config::{validate_block_index, TestRunConfig, VALVES_PER_BLOCK};
use crate::utils::error::{AppError, AppResult};
use crate::utils::time_utils::Clock;

/// 单个阀门在一次运行中的使用次数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValveUsage {
    pub valve_number: u8,
    pub enabled: bool,
    pub start_counter_value: Option<u64>,
    pub end_counter_value: Option<u64>,
    /// 结束计数 - 起始计数；任一缺失或计数器复位时为空
    pub usage: Option<u64>,
}

/// 测试运行生命周期接口
#[async_trait]
pub trait ITestRunLifecycle: Send + Sync {
    /// 开始测试运行，返回运行ID
    async fn start(
        &self,
        test_type: TestType,
        block_index: u8,
        valve_configs: Vec<ValveConfig>,
        parameter_set_refs: Vec<String>,
    ) -> AppResult<String>;

    /// 正常结束
    async fn stop(&self, run_id: &str) -> AppResult<TestRun>;

    /// 取消
    async fn cancel(&self, run_id: &str) -> AppResult<TestRun>;

    /// 以失败结束，记录原因
    async fn fail(&self, run_id: &str, reason: &str) -> AppResult<TestRun>;

    /// 查询运行
    async fn get_run(&self, run_id: &str) -> AppResult<Option<TestRun>>;

    /// 工位上正在运行的测试
    async fn running_run(&self, block_index: u8) -> Option<TestRun>;

    /// 各阀门的使用次数
    async fn usage(&self, run_id: &str) -> AppResult<Vec<ValveUsage>>;
}

/// 测试运行生命周期实现
pub struct TestRunLifecycle {
    reader: Arc<dyn ITagReader>,
    store: Arc<dyn ISnapshotStore>,
    resolver: Arc<dyn ITagAddressResolver>,
    clock: Arc<dyn Clock>,
    config: TestRunConfig,
    /// 运行表，锁在整个操作期间持有以串行化生命周期操作
    runs: Mutex<HashMap<String, TestRun>>,
}

impl TestRunLifecycle {
    pub fn new(
        config: TestRunConfig,
        reader: Arc<dyn ITagReader>,
        store: Arc<dyn ISnapshotStore>,
        resolver: Arc<dyn ITagAddressResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reader,
            store,
            resolver,
            clock,
            config,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// 校验阀门配置
    fn validate_valve_configs(test_type: TestType, valve_configs: &[ValveConfig]) -> AppResult<()> {
        let mut seen = HashSet::new();
        for config in valve_configs {
            if !(1..=VALVES_PER_BLOCK).contains(&config.valve_number) {
                return Err(AppError::validation_error(format!(
                    "阀门编号 {} 超出范围 1..={}",
                    config.valve_number, VALVES_PER_BLOCK
                )));
            }
            if !seen.insert(config.valve_number) {
                return Err(AppError::validation_error(format!("阀门编号 {} 重复", config.valve_number)));
            }
        }

        let enabled = valve_configs.iter().filter(|v| v.enabled).count();
        if enabled == 0 {
            return Err(AppError::validation_error("至少需要启用一个阀门"));
        }
        if test_type == TestType::Einzeltest && enabled != 1 {
            return Err(AppError::validation_error(format!(
                "Einzeltest 必须恰好启用一个阀门，当前启用 {} 个",
                enabled
            )));
        }
        Ok(())
    }

    async fn ensure_parameter_sets_exist(&self, refs: &[String]) -> AppResult<()> {
        for id in refs {
            if self.store.load_parameter_set(id).await?.is_none() {
                return Err(AppError::not_found_error("ParameterSet", id.clone()));
            }
        }
        Ok(())
    }

    async fn read_valve_counter(&self, block: u8, valve: u8) -> AppResult<u64> {
        self.reader.read_u64(&self.resolver.valve_counter(block, valve)).await
    }

    /// 从内存运行表或存储中取运行的副本
    async fn find_run(&self, runs: &HashMap<String, TestRun>, run_id: &str) -> AppResult<TestRun> {
        if let Some(run) = runs.get(run_id) {
            return Ok(run.clone());
        }
        self.store
            .load_test_run(run_id)
            .await?
            .ok_or_else(|| AppError::not_found_error("TestRun", run_id.to_string()))
    }

    /// 从 Running 转换到终态
    async fn finish(&self, run_id: &str, target: TestRunStatus, reason: Option<&str>) -> AppResult<TestRun> {
        let mut runs = self.runs.lock().await;
        let mut run = self.find_run(&runs, run_id).await?;

        if run.status != TestRunStatus::Running {
            return Err(AppError::invalid_transition(
                run.status.to_string(),
                target.to_string(),
                format!("测试运行 {} 不在运行状态", run_id),
            ));
        }

        let block = run.block_index;
        for valve in run.valve_configs.iter_mut() {
            match self.read_valve_counter(block, valve.valve_number).await {
                Ok(counter) => valve.end_counter_value = Some(counter),
                Err(e) => {
                    valve.end_counter_value = None;
                    crate::log_communication_failure!(
                        "[TEST_RUN] 读取工位{} 阀门{} 结束计数器失败，结束值留空: {}",
                        block,
                        valve.valve_number,
                        e
                    );
                }
            }
        }
        run.status = target;
        run.completed_at = Some(self.clock.now());
        run.failure_reason = reason.map(str::to_string);

        self.store.update_test_run(&run).await?;
        runs.insert(run.id.clone(), run.clone());
        log::info!("🏁 [TEST_RUN] 测试运行 {} (工位{}) Running -> {}", run.id, block, target);
        Ok(run)
    }
}

#[async_trait]
impl ITestRunLifecycle for TestRunLifecycle {
    async fn start(
        &self,
        test_type: TestType,
        block_index: u8,
        valve_configs: Vec<ValveConfig>,
        parameter_set_refs: Vec<String>,
    ) -> AppResult<String> {
        validate_block_index(block_index)?;
        Self::validate_valve_configs(test_type, &valve_configs)?;

        let mut runs = self.runs.lock().await;
        if let Some(active) = runs
            .values()
            .find(|r| r.block_index == block_index && r.status == TestRunStatus::Running)
        {
            return Err(AppError::business_logic_error(format!(
                "工位{} 已有正在运行的测试 {}",
                block_index, active.id
            )));
        }
        self.ensure_parameter_sets_exist(&parameter_set_refs).await?;

        if !self.reader.is_connected() {
            return Err(AppError::connectivity_error("PLC未连接，无法读取起始计数器"));
        }

        let mut valve_configs = valve_configs;
        for valve in valve_configs.iter_mut() {
            valve.start_counter_value = None;
            valve.end_counter_value = None;
        }
        for valve in valve_configs.iter_mut().filter(|v| v.enabled) {
            let counter = self.read_valve_counter(block_index, valve.valve_number).await.map_err(|e| {
                crate::log_communication_failure!(
                    "[TEST_RUN] 读取工位{} 阀门{} 起始计数器失败: {}",
                    block_index,
                    valve.valve_number,
                    e
                );
                e
            })?;
            valve.start_counter_value = Some(counter);
        }

        let mut run = TestRun::new(test_type, block_index, valve_configs, parameter_set_refs, self.clock.now());
        run.valve_sperre = valve_sperre_from_configs(&run.valve_configs);
        run.status = TestRunStatus::Running;

        self.store.save_test_run(&run).await.map_err(|e| {
            crate::log_persistence_failure!("[TEST_RUN] 保存测试运行 {} 失败，未开始: {}", run.id, e);
            e
        })?;

        if self.config.write_valve_sperre_on_start {
            let node_id = self.resolver.valve_sperre(block_index);
            if let Err(e) = self.reader.write(&node_id, TagValue::from(run.valve_sperre)).await {
                crate::log_communication_failure!("[TEST_RUN] 写入 {} 失败: {}", node_id, e);
            }
        }

        log::info!(
            "🚀 [TEST_RUN] 测试运行 {} 已开始: {} 工位{}, 启用阀门 {}, VentilSperre=0x{:04X}",
            run.id,
            test_type,
            block_index,
            run.enabled_valves().count(),
            run.valve_sperre
        );
        let run_id = run.id.clone();
        runs.insert(run_id.clone(), run);
        Ok(run_id)
    }

    async fn stop(&self, run_id: &str) -> AppResult<TestRun> {
        crate::log_user_operation!("停止测试运行 {}", run_id);
        self.finish(run_id, TestRunStatus::Completed, None).await
    }

    async fn cancel(&self, run_id: &str) -> AppResult<TestRun> {
        crate::log_user_operation!("取消测试运行 {}", run_id);
        self.finish(run_id, TestRunStatus::Cancelled, None).await
    }

    async fn fail(&self, run_id: &str, reason: &str) -> AppResult<TestRun> {
        log::warn!("⚠️ [TEST_RUN] 测试运行 {} 失败: {}", run_id, reason);
        self.finish(run_id, TestRunStatus::Failed, Some(reason)).await
    }

    async fn get_run(&self, run_id: &str) -> AppResult<Option<TestRun>> {
        if let Some(run) = self.runs.lock().await.get(run_id) {
            return Ok(Some(run.clone()));
        }
        self.store.load_test_run(run_id).await
    }

    async fn running_run(&self, block_index: u8) -> Option<TestRun> {
        self.runs
            .lock()
            .await
            .values()
            .find(|r| r.block_index == block_index && r.status == TestRunStatus::Running)
            .cloned()
    }

    async fn usage(&self, run_id: &str) -> AppResult<Vec<ValveUsage>> {
        let run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::not_found_error("TestRun", run_id.to_string()))?;
        Ok(run
            .valve_configs
            .iter()
            .map(|v| ValveUsage {
                valve_number: v.valve_number,
                enabled: v.enabled,
                start_counter_value: v.start_counter_value,
                end_counter_value: v.end_counter_value,
                usage: v.usage(),
            })
            .collect())
    }
}
