//! 台架端到端场景集成测试
//!
//! 使用模拟PLC、SQLite存储和手动时钟/定时器，验证采集、生命周期和设置接口的完整行为。

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use valve_bench_lib::services::domain::{
    encode_valve_sperre, ITestRunLifecycle, ManualTicker, MeasurementCaptureEngine, TestRunLifecycle,
};
use valve_bench_lib::services::infrastructure::persistence::{InMemorySnapshotStore, SqliteOrmSnapshotStore};
use valve_bench_lib::services::infrastructure::plc::{ConventionalTagAddressResolver, MockTagReader};
use valve_bench_lib::utils::config::{CaptureConfig, TestRunConfig};
use valve_bench_lib::utils::time_utils::{Clock, ManualClock};
use valve_bench_lib::{
    AppError, AppResult, BaseService, ISnapshotStore, MeasurementRecord, MeasurementType, ParameterSet,
    SaveOutcome, TestRun, TestRunStatus, TestType, ValveConfig,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 7, 30, 0).unwrap())
}

fn capture_config(groups: &[&str]) -> CaptureConfig {
    CaptureConfig {
        enabled: true,
        polling_interval_ms: 200,
        monitored_groups: groups.iter().map(|g| g.to_string()).collect(),
        cycle_soft_deadline_ms: None,
    }
}

fn engine(config: &CaptureConfig, reader: &MockTagReader, store: Arc<dyn ISnapshotStore>) -> MeasurementCaptureEngine {
    MeasurementCaptureEngine::new(
        config,
        Arc::new(reader.clone()),
        store,
        Arc::new(ConventionalTagAddressResolver),
        Arc::new(clock()),
        Arc::new(ManualTicker::new()),
    )
    .expect("创建采集引擎失败")
}

fn preset_group(reader: &MockTagReader, block: u8, valve: u8, measurement_type: MeasurementType) {
    use valve_bench_lib::services::infrastructure::plc::ITagAddressResolver;
    for (_, node_id) in ConventionalTagAddressResolver.measurement_group(block, valve, measurement_type) {
        reader.preset_value(node_id, 1.25f64);
    }
}

/// 保存实际成功、但确认丢失的存储，模拟"部分成功后重试"的竞态
struct LostAckStore {
    inner: SqliteOrmSnapshotStore,
    lost_acks: AtomicU32,
}

#[async_trait]
impl BaseService for LostAckStore {
    fn service_name(&self) -> &'static str {
        "LostAckStore"
    }

    async fn health_check(&self) -> AppResult<()> {
        self.inner.health_check().await
    }
}

#[async_trait]
impl ISnapshotStore for LostAckStore {
    async fn save_measurement(&self, record: &MeasurementRecord) -> AppResult<SaveOutcome> {
        let outcome = self.inner.save_measurement(record).await?;
        if self
            .lost_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::persistence_error("提交确认超时"));
        }
        Ok(outcome)
    }

    async fn latest_counter_value(
        &self,
        block: u8,
        valve: u8,
        measurement_type: MeasurementType,
    ) -> AppResult<Option<u64>> {
        self.inner.latest_counter_value(block, valve, measurement_type).await
    }

    async fn load_measurements(
        &self,
        block: u8,
        valve: Option<u8>,
        measurement_type: Option<MeasurementType>,
    ) -> AppResult<Vec<MeasurementRecord>> {
        self.inner.load_measurements(block, valve, measurement_type).await
    }

    async fn save_test_run(&self, run: &TestRun) -> AppResult<String> {
        self.inner.save_test_run(run).await
    }

    async fn update_test_run(&self, run: &TestRun) -> AppResult<()> {
        self.inner.update_test_run(run).await
    }

    async fn load_test_run(&self, run_id: &str) -> AppResult<Option<TestRun>> {
        self.inner.load_test_run(run_id).await
    }

    async fn load_test_runs_by_block(&self, block: u8) -> AppResult<Vec<TestRun>> {
        self.inner.load_test_runs_by_block(block).await
    }

    async fn save_parameter_set(&self, set: &ParameterSet) -> AppResult<()> {
        self.inner.save_parameter_set(set).await
    }

    async fn load_parameter_set(&self, id: &str) -> AppResult<Option<ParameterSet>> {
        self.inner.load_parameter_set(id).await
    }
}

#[tokio::test]
async fn scenario_counter_sequence_yields_one_capture_per_increase() {
    init_logger();
    let reader = MockTagReader::new();
    let store = Arc::new(InMemorySnapshotStore::new());
    reader.script_values("Block1.Ventil3.Strom.DatenReady", vec![0u64, 0, 1, 1, 2]);
    preset_group(&reader, 1, 3, MeasurementType::Current);

    let engine = engine(&capture_config(&["1.3.Current"]), &reader, store.clone());
    for _ in 0..5 {
        engine.poll_once().await.unwrap();
    }
    // 序列耗尽后保持最后一个值，不应再有采集
    for _ in 0..3 {
        assert_eq!(engine.poll_once().await.unwrap().captures, 0);
    }

    let records = store.load_measurements(1, Some(3), Some(MeasurementType::Current)).await.unwrap();
    let counters: Vec<u64> = records.iter().map(|r| r.counter_value).collect();
    assert_eq!(counters, vec![1, 2]);
    assert_eq!(engine.status().captures_total, 2);
}

#[tokio::test]
async fn scenario_langzeittest_start_stop_records_counters() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let reader = MockTagReader::new();
    for valve in 1..=16u64 {
        reader.preset_value(format!("Block1.Ventil{}.Zaehler", valve), 100 + valve);
    }
    let store = Arc::new(SqliteOrmSnapshotStore::new(Some(dir.path().join("bench.sqlite").as_path())).await.unwrap());
    let clock = clock();
    let lifecycle = TestRunLifecycle::new(
        TestRunConfig::default(),
        Arc::new(reader.clone()),
        store.clone(),
        Arc::new(ConventionalTagAddressResolver),
        Arc::new(clock.clone()),
    );

    let valves: Vec<ValveConfig> = (1..=16).map(|n| ValveConfig::new(n, n <= 3)).collect();
    let run_id = lifecycle.start(TestType::Langzeittest, 1, valves, vec![]).await.unwrap();
    assert_eq!(lifecycle.running_run(1).await.map(|r| r.id), Some(run_id.clone()));

    for valve in 1..=3u64 {
        reader.preset_value(format!("Block1.Ventil{}.Zaehler", valve), 5000 + valve);
    }
    clock.advance_ms(3_600_000);
    let done = lifecycle.stop(&run_id).await.unwrap();
    assert_eq!(done.status, TestRunStatus::Completed);

    let persisted = store.load_test_run(&run_id).await.unwrap().unwrap();
    assert_eq!(persisted.status, TestRunStatus::Completed);
    assert_eq!(persisted.completed_at, Some(clock.now()));
    for valve in &persisted.valve_configs[..3] {
        assert!(valve.end_counter_value.is_some());
        assert_eq!(valve.usage(), Some(4900));
    }

    let mut enabled = [false; 16];
    enabled[..3].copy_from_slice(&[true; 3]);
    let mask = encode_valve_sperre(&enabled);
    assert_eq!(mask & 0b111, 0);
    assert_eq!(mask >> 3, 0x1FFF);
    assert_eq!(persisted.valve_sperre, mask);
}

#[tokio::test]
async fn scenario_polling_interval_below_floor_is_rejected() {
    let reader = MockTagReader::new();
    let engine = engine(&capture_config(&["1.1.Force"]), &reader, Arc::new(InMemorySnapshotStore::new()));

    let err = engine.set_polling_interval_ms(50).unwrap_err();
    assert!(matches!(err, AppError::InvalidConfig { .. }));
    assert_eq!(engine.get_polling_interval_ms(), 200);
}

#[tokio::test]
async fn scenario_node_read_error_on_one_valve_does_not_block_neighbour() {
    init_logger();
    let reader = MockTagReader::new();
    let store = Arc::new(InMemorySnapshotStore::new());
    reader.preset_value("Block2.Ventil7.Durchfluss.DatenReady", 4u64);
    reader.preset_value("Block2.Ventil8.Durchfluss.DatenReady", 9u64);
    preset_group(&reader, 2, 7, MeasurementType::Flow);
    preset_group(&reader, 2, 8, MeasurementType::Flow);

    let engine = engine(&capture_config(&["2.7.Flow", "2.8.Flow"]), &reader, store.clone());
    engine.poll_once().await.unwrap();

    reader.fail_node("Block2.Ventil7.Durchfluss.DatenReady");
    reader.preset_value("Block2.Ventil8.Durchfluss.DatenReady", 10u64);
    let report = engine.poll_once().await.unwrap();
    assert_eq!(report.read_failures, 1);
    assert_eq!(report.captures, 1);

    let records = store.load_measurements(2, Some(8), Some(MeasurementType::Flow)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].counter_value, 10);
}

#[tokio::test]
async fn scenario_retry_after_lost_ack_stores_exactly_one_record() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bench.sqlite");
    let store = Arc::new(LostAckStore {
        inner: SqliteOrmSnapshotStore::new(Some(db_path.as_path())).await.unwrap(),
        lost_acks: AtomicU32::new(1),
    });

    let reader = MockTagReader::new();
    reader.preset_value("Block3.Ventil1.Kraft.DatenReady", 20u64);
    preset_group(&reader, 3, 1, MeasurementType::Force);
    let engine = engine(&capture_config(&["3.1.Force"]), &reader, store.clone());
    engine.poll_once().await.unwrap();

    reader.preset_value("Block3.Ventil1.Kraft.DatenReady", 21u64);
    let first = engine.poll_once().await.unwrap();
    assert_eq!(first.persistence_failures, 1);

    let retry = engine.poll_once().await.unwrap();
    assert_eq!(retry.duplicates, 1, "重试时存储判定为重复");
    assert_eq!(retry.captures, 0);

    let records = store.load_measurements(3, Some(1), None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "3-1-Force-21");

    // 直接重复保存同一自然键也只保留一条
    let again = store.inner.save_measurement(&records[0]).await.unwrap();
    assert!(again.is_duplicate());
    assert_eq!(store.load_measurements(3, None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn scenario_restarted_engine_resumes_from_persisted_counter() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bench.sqlite");
    let reader = MockTagReader::new();
    reader.preset_value("Block1.Ventil1.Strom.DatenReady", 3u64);
    preset_group(&reader, 1, 1, MeasurementType::Current);

    {
        let store = Arc::new(SqliteOrmSnapshotStore::new(Some(db_path.as_path())).await.unwrap());
        let engine = engine(&capture_config(&["1.1.Current"]), &reader, store);
        engine.poll_once().await.unwrap();
        reader.preset_value("Block1.Ventil1.Strom.DatenReady", 4u64);
        assert_eq!(engine.poll_once().await.unwrap().captures, 1);
    }

    // 进程重启期间PLC又完成了一次测量
    reader.preset_value("Block1.Ventil1.Strom.DatenReady", 5u64);
    let store = Arc::new(SqliteOrmSnapshotStore::new(Some(db_path.as_path())).await.unwrap());
    let engine = engine(&capture_config(&["1.1.Current"]), &reader, store.clone());
    let report = engine.poll_once().await.unwrap();
    assert_eq!(report.captures, 1);
    assert_eq!(report.baselines, 0);

    let counters: Vec<u64> = store
        .load_measurements(1, Some(1), Some(MeasurementType::Current))
        .await
        .unwrap()
        .iter()
        .map(|r| r.counter_value)
        .collect();
    assert_eq!(counters, vec![4, 5]);
}
