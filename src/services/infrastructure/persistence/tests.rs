// 文件: src/services/infrastructure/persistence/tests.rs
// 快照存储与设置服务的单元测试，两种存储实现共用同一组契约测试

use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use crate::models::enums::*;
use crate::models::structs::*;
use crate::services::infrastructure::persistence::{
    CaptureSettings, ICaptureSettingsService, InMemorySnapshotStore, JsonCaptureSettingsService,
    SqliteOrmSnapshotStore,
};
use crate::services::traits::{BaseService, ISnapshotStore, SaveOutcome};

fn record(block: u8, valve: u8, measurement_type: MeasurementType, counter: u64) -> MeasurementRecord {
    MeasurementRecord::new(
        block,
        valve,
        measurement_type,
        counter,
        json!({ "MessID": counter, "StromMax": 1.5 }),
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
    )
}

fn sample_run() -> TestRun {
    let mut run = TestRun::new(
        TestType::Detailtest,
        2,
        vec![ValveConfig::new(1, true).with_comment("Serie A"), ValveConfig::new(2, false)],
        vec!["ps-1".to_string()],
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
    );
    run.valve_configs[0].start_counter_value = Some(10);
    run.valve_sperre = 0xFFFE;
    run
}

fn sample_parameter_set(id: &str) -> ParameterSet {
    ParameterSet {
        id: id.to_string(),
        name: "Standard".to_string(),
        air_pressure_bar: 6.0,
        cycle_count: 500,
        switch_on_ms: 100,
        switch_off_ms: 400,
        current_limit_a: 0.8,
        mess_mode: 1,
        comment: None,
    }
}

async fn create_sqlite_store() -> (SqliteOrmSnapshotStore, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("bench.sqlite");
    let store = SqliteOrmSnapshotStore::new(Some(db_path.as_path())).await.unwrap();
    (store, temp_dir)
}

/// 测量记录：插入、幂等去重、最新计数器和查询
async fn check_measurement_contract(store: &dyn ISnapshotStore) {
    let first = store.save_measurement(&record(1, 3, MeasurementType::Current, 5)).await.unwrap();
    assert_eq!(first, SaveOutcome::Inserted("1-3-Current-5".to_string()));

    let again = store.save_measurement(&record(1, 3, MeasurementType::Current, 5)).await.unwrap();
    assert!(again.is_duplicate(), "重复自然键应为幂等空操作");
    assert_eq!(again.id(), "1-3-Current-5");

    store.save_measurement(&record(1, 3, MeasurementType::Current, 7)).await.unwrap();
    store.save_measurement(&record(1, 3, MeasurementType::Flow, 99)).await.unwrap();
    store.save_measurement(&record(2, 3, MeasurementType::Current, 50)).await.unwrap();

    assert_eq!(store.latest_counter_value(1, 3, MeasurementType::Current).await.unwrap(), Some(7));
    assert_eq!(store.latest_counter_value(1, 4, MeasurementType::Current).await.unwrap(), None);

    let current = store.load_measurements(1, Some(3), Some(MeasurementType::Current)).await.unwrap();
    let counters: Vec<u64> = current.iter().map(|r| r.counter_value).collect();
    assert_eq!(counters, vec![5, 7]);
    assert_eq!(current[0].payload["StromMax"], 1.5);

    assert_eq!(store.load_measurements(1, None, None).await.unwrap().len(), 3);
}

/// 测试运行：保存、更新、加载
async fn check_test_run_contract(store: &dyn ISnapshotStore) {
    let mut run = sample_run();
    let id = store.save_test_run(&run).await.unwrap();
    assert_eq!(id, run.id);

    let loaded = store.load_test_run(&id).await.unwrap().unwrap();
    assert_eq!(loaded, run);

    run.status = TestRunStatus::Completed;
    run.completed_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    run.valve_configs[0].end_counter_value = Some(25);
    store.update_test_run(&run).await.unwrap();

    let loaded = store.load_test_run(&id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TestRunStatus::Completed);
    assert_eq!(loaded.valve_configs[0].usage(), Some(15));
    assert_eq!(loaded.valve_sperre, 0xFFFE);

    assert!(store.load_test_run("missing").await.unwrap().is_none());
    assert_eq!(store.load_test_runs_by_block(2).await.unwrap().len(), 1);
    assert!(store.load_test_runs_by_block(1).await.unwrap().is_empty());
}

/// 参数集：插入与覆盖
async fn check_parameter_set_contract(store: &dyn ISnapshotStore) {
    let mut set = sample_parameter_set("ps-1");
    store.save_parameter_set(&set).await.unwrap();
    set.cycle_count = 1000;
    store.save_parameter_set(&set).await.unwrap();
    assert_eq!(store.load_parameter_set("ps-1").await.unwrap(), Some(set));
    assert_eq!(store.load_parameter_set("ps-2").await.unwrap(), None);
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    let store = InMemorySnapshotStore::new();
    check_measurement_contract(&store).await;
    check_test_run_contract(&store).await;
    check_parameter_set_contract(&store).await;
    assert!(store.health_check().await.is_ok());
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let (store, _temp_dir) = create_sqlite_store().await;
    assert!(store.health_check().await.is_ok());
    check_measurement_contract(&store).await;
    check_test_run_contract(&store).await;
    check_parameter_set_contract(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("bench.sqlite");
    {
        let store = SqliteOrmSnapshotStore::new(Some(db_path.as_path())).await.unwrap();
        store.save_measurement(&record(4, 16, MeasurementType::Force, 12)).await.unwrap();
    }
    let reopened = SqliteOrmSnapshotStore::new(Some(db_path.as_path())).await.unwrap();
    assert_eq!(
        reopened.latest_counter_value(4, 16, MeasurementType::Force).await.unwrap(),
        Some(12)
    );
    let dup = reopened.save_measurement(&record(4, 16, MeasurementType::Force, 12)).await.unwrap();
    assert!(dup.is_duplicate());
}

#[tokio::test]
async fn test_sqlite_update_of_unknown_run_fails() {
    let (store, _temp_dir) = create_sqlite_store().await;
    let err = store.update_test_run(&sample_run()).await.unwrap_err();
    assert_eq!(err.error_code(), "PERSISTENCE_ERROR");
}

#[tokio::test]
async fn test_in_memory_failure_injection() {
    let store = InMemorySnapshotStore::new();
    store.fail_next_saves(2);
    assert!(store.save_measurement(&record(1, 1, MeasurementType::Current, 1)).await.is_err());
    assert!(store.save_measurement(&record(1, 1, MeasurementType::Current, 1)).await.is_err());
    assert!(store.save_measurement(&record(1, 1, MeasurementType::Current, 1)).await.is_ok());
    assert_eq!(store.save_attempts(), 3);
    assert_eq!(store.measurement_count().await, 1);

    store.reject_all_writes(true);
    assert!(store.save_test_run(&sample_run()).await.is_err());
}

#[tokio::test]
async fn test_capture_settings_round_trip_via_file() {
    let temp_dir = TempDir::new().unwrap();
    let service = JsonCaptureSettingsService::new(temp_dir.path().join("settings"));
    assert!(service.load_settings().await.unwrap().is_none());

    service.initialize().await.unwrap();
    assert!(service.health_check().await.is_ok());

    let settings = CaptureSettings { enabled: false, polling_interval_ms: 750 };
    service.save_settings(&settings).await.unwrap();
    assert_eq!(service.load_settings().await.unwrap(), Some(settings));

    let content = std::fs::read_to_string(service.settings_file_path()).unwrap();
    assert!(content.contains("pollingIntervalMs"));
}

#[tokio::test]
async fn test_capture_settings_rejects_interval_below_floor() {
    let temp_dir = TempDir::new().unwrap();
    let service = JsonCaptureSettingsService::new(temp_dir.path());
    std::fs::write(service.settings_file_path(), r#"{"enabled":true,"pollingIntervalMs":10}"#).unwrap();
    let err = service.load_settings().await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_CONFIG");
}
