//! # 状态缓存服务 (Status Cache Service)
//!
//! 以独立于采集引擎的节奏轮询全局数据、工位通用参数和16个阀门的状态标签，
//! 为每个工位构建不可变的 [`CacheSnapshot`] 并整体替换发布。
//!
//! - 单个标签读取失败只让对应字段为 null，子对象全部失败时整个子对象为 null
//! - PLC断开的周期不发布任何快照，仪表盘继续看到上一次的完整快照
//! - `get()` 只读取已发布的快照，从不触发实时读取

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use crate::models::enums::MeasurementType;
use crate::models::structs::*;
use crate::services::domain::periodic_scheduler::{CycleProgress, CycleTask, PeriodicScheduler, Ticker};
use crate::services::infrastructure::plc::{
    GeneralParameterField, GlobalField, ITagAddressResolver, ITagReader, StatusField,
};
use crate::utils::config::{validate_block_index, StatusCacheConfig, VALVES_PER_BLOCK};
use crate::utils::error::{AppError, AppResult};
use crate::utils::time_utils::Clock;

type SnapshotTable = RwLock<HashMap<u8, Arc<CacheSnapshot>>>;

/// 单次刷新报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRefreshReport {
    pub started_at: Option<DateTime<Utc>>,
    pub skipped_disconnected: bool,
    pub blocks_published: usize,
    pub failed_reads: usize,
}

/// 一个刷新周期内的读取统计
#[derive(Default)]
struct ReadTally {
    failed: usize,
    disconnected: bool,
}

/// 刷新周期任务
pub struct StatusRefreshCycle {
    blocks: Arc<Vec<u8>>,
    reader: Arc<dyn ITagReader>,
    resolver: Arc<dyn ITagAddressResolver>,
    clock: Arc<dyn Clock>,
    snapshots: Arc<SnapshotTable>,
}

impl StatusRefreshCycle {
    /// 读取单个标签，失败时返回 None
    async fn read_opt(&self, node_id: &str, tally: &mut ReadTally) -> Option<TagValue> {
        if tally.disconnected {
            return None;
        }
        match self.reader.read(node_id).await {
            Ok(value) => Some(value),
            Err(AppError::ConnectivityError { .. }) => {
                tally.disconnected = true;
                None
            }
            Err(e) => {
                log::debug!("[STATUS_CACHE] 读取 {} 失败: {}", node_id, e);
                tally.failed += 1;
                None
            }
        }
    }

    async fn read_global_data(&self, tally: &mut ReadTally) -> Option<GlobalData> {
        let mut data = GlobalData::default();
        for field in GlobalField::ALL {
            let value = self.read_opt(&self.resolver.global_field(field), tally).await;
            match field {
                GlobalField::BatteryStatus => data.battery_status = value,
                GlobalField::GeneralErrors => data.general_errors = value,
                GlobalField::TemperaturePlc => data.temperature_plc = value,
                GlobalField::Version => data.version = value,
            }
        }
        (data != GlobalData::default()).then_some(data)
    }

    async fn read_general_parameters(&self, block: u8, tally: &mut ReadTally) -> Option<GeneralParameters> {
        let mut params = GeneralParameters::default();
        for field in GeneralParameterField::ALL {
            let value = self.read_opt(&self.resolver.general_parameter(block, field), tally).await;
            match field {
                GeneralParameterField::Fehlerbit => params.fehlerbit = value,
                GeneralParameterField::CurrentAirPressure => params.current_air_pressure = value,
                GeneralParameterField::CurrentAirFlow => params.current_air_flow = value,
                GeneralParameterField::CurrentForce => params.current_force = value,
                GeneralParameterField::MessMode => params.mess_mode = value,
                GeneralParameterField::OperationMode => params.operation_mode = value,
            }
        }
        (params != GeneralParameters::default()).then_some(params)
    }

    async fn read_measurement_status(
        &self,
        block: u8,
        valve: u8,
        measurement_type: MeasurementType,
        tally: &mut ReadTally,
    ) -> Option<MeasurementStatus> {
        let mut status = MeasurementStatus::default();
        for field in StatusField::ALL {
            let node_id = self.resolver.status_field(block, valve, measurement_type, field);
            let value = self.read_opt(&node_id, tally).await;
            match field {
                StatusField::Status => status.status = value,
                StatusField::DatenReady => status.daten_ready = value,
                StatusField::MessId => status.mess_id = value,
            }
        }
        (status != MeasurementStatus::default()).then_some(status)
    }

    async fn read_valve(&self, block: u8, valve: u8, tally: &mut ReadTally) -> ValveStatus {
        ValveStatus {
            ventil_nr: valve,
            zaehler: self.read_opt(&self.resolver.valve_counter(block, valve), tally).await,
            strom: self.read_measurement_status(block, valve, MeasurementType::Current, tally).await,
            durchfluss: self.read_measurement_status(block, valve, MeasurementType::Flow, tally).await,
            kraft: self.read_measurement_status(block, valve, MeasurementType::Force, tally).await,
        }
    }

    fn publish(&self, snapshots: Vec<CacheSnapshot>) {
        let mut table = self.snapshots.write().unwrap_or_else(|e| e.into_inner());
        for snapshot in snapshots {
            table.insert(snapshot.block_index, Arc::new(snapshot));
        }
    }
}

#[async_trait]
impl CycleTask for StatusRefreshCycle {
    type Report = StatusRefreshReport;

    async fn run_cycle(&mut self) -> StatusRefreshReport {
        let mut report = StatusRefreshReport {
            started_at: Some(self.clock.now()),
            ..Default::default()
        };
        if !self.reader.is_connected() {
            report.skipped_disconnected = true;
            return report;
        }

        let mut tally = ReadTally::default();
        let global_data = self.read_global_data(&mut tally).await;

        let mut built = Vec::with_capacity(self.blocks.len());
        for &block in self.blocks.iter() {
            let general_parameters = self.read_general_parameters(block, &mut tally).await;
            let mut ventil_data = Vec::with_capacity(usize::from(VALVES_PER_BLOCK));
            for valve in 1..=VALVES_PER_BLOCK {
                ventil_data.push(self.read_valve(block, valve, &mut tally).await);
            }
            built.push(CacheSnapshot {
                block_index: block,
                last_updated: self.clock.now(),
                global_data: global_data.clone(),
                general_parameters,
                ventil_data,
            });
        }

        report.failed_reads = tally.failed;
        if tally.disconnected {
            log::warn!("⚠️ [STATUS_CACHE] 刷新期间PLC断开，本周期不发布快照");
            report.skipped_disconnected = true;
            return report;
        }

        report.blocks_published = built.len();
        self.publish(built);
        if report.failed_reads > 0 {
            log::debug!("[STATUS_CACHE] 刷新完成，{} 个标签读取失败", report.failed_reads);
        }
        report
    }
}

/// 状态缓存服务状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCacheStatus {
    pub enabled: bool,
    pub running: bool,
    pub refresh_interval_ms: u64,
    pub blocks: Vec<u8>,
    pub cycles_completed: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

/// 状态缓存服务
pub struct StatusCacheService {
    scheduler: PeriodicScheduler<StatusRefreshCycle>,
    snapshots: Arc<SnapshotTable>,
    blocks: Vec<u8>,
    enabled: bool,
}

impl StatusCacheService {
    pub fn new(
        config: &StatusCacheConfig,
        reader: Arc<dyn ITagReader>,
        resolver: Arc<dyn ITagAddressResolver>,
        clock: Arc<dyn Clock>,
        ticker: Arc<dyn Ticker>,
    ) -> AppResult<Self> {
        let mut blocks = config.blocks.clone();
        blocks.sort_unstable();
        blocks.dedup();
        for &block in &blocks {
            validate_block_index(block)?;
        }

        let snapshots: Arc<SnapshotTable> = Arc::new(RwLock::new(HashMap::new()));
        let cycle_blocks = Arc::new(blocks.clone());
        let table = snapshots.clone();
        let scheduler = PeriodicScheduler::new("StatusCache", config.refresh_interval_ms, ticker, move || {
            StatusRefreshCycle {
                blocks: cycle_blocks.clone(),
                reader: reader.clone(),
                resolver: resolver.clone(),
                clock: clock.clone(),
                snapshots: table.clone(),
            }
        })?;

        log::info!("🗂️ [STATUS_CACHE] 状态缓存已创建: 工位 {:?}, 间隔 {}ms", blocks, config.refresh_interval_ms);
        Ok(Self {
            scheduler,
            snapshots,
            blocks,
            enabled: config.enabled,
        })
    }

    /// 最近发布的快照；从未成功刷新时返回 None
    pub fn get(&self, block_index: u8) -> Option<Arc<CacheSnapshot>> {
        self.snapshots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&block_index)
            .cloned()
    }

    /// 所有已发布的快照，按工位排序
    pub fn get_all(&self) -> Vec<Arc<CacheSnapshot>> {
        let table = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Arc<CacheSnapshot>> = table.values().cloned().collect();
        all.sort_by_key(|s| s.block_index);
        all
    }

    /// 启动刷新循环；配置中未启用时为空操作
    pub async fn start(&self) -> bool {
        if !self.enabled {
            log::info!("[STATUS_CACHE] 状态缓存未启用，忽略启动请求");
            return false;
        }
        self.scheduler.start().await
    }

    pub async fn stop(&self) -> bool {
        self.scheduler.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// 在未运行时执行一次刷新
    pub async fn refresh_once(&self) -> AppResult<StatusRefreshReport> {
        self.scheduler.run_once().await
    }

    pub fn refresh_interval_ms(&self) -> u64 {
        self.scheduler.interval_ms()
    }

    pub fn set_refresh_interval_ms(&self, interval_ms: u64) -> AppResult<()> {
        self.scheduler.set_interval_ms(interval_ms)
    }

    pub fn subscribe(&self) -> watch::Receiver<CycleProgress<StatusRefreshReport>> {
        self.scheduler.subscribe()
    }

    pub fn status(&self) -> StatusCacheStatus {
        let progress = self.scheduler.progress();
        StatusCacheStatus {
            enabled: self.enabled,
            running: self.is_running(),
            refresh_interval_ms: self.refresh_interval_ms(),
            blocks: self.blocks.clone(),
            cycles_completed: progress.cycles,
            last_refresh_at: progress.last_report.and_then(|r| r.started_at),
        }
    }
}
