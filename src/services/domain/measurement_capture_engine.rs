//! # 测量采集引擎 (Measurement Capture Engine)
//!
//! ## 业务说明
//! PLC在每次测量完成后递增对应 (工位, 阀门, 测量类型) 的 DatenReady 计数器。
//! 引擎周期性轮询这些计数器，发现计数器**严格增加**时读取该测量组的数据，
//! 以新计数器值为自然键持久化一条不可变记录。
//!
//! ## 核心规则
//! - 每个三元组维护"最后已见"计数器，只由引擎自身的循环修改
//! - 计数器增加：读取测量组 → 保存 → 保存成功（或重复空操作）后才推进最后已见值
//! - 保存失败：最后已见值不变，下个周期重试（至少一次语义，存储侧去重）
//! - 计数器减小：视为PLC重启或复位，重新建立基线，不产生采集
//! - 首次观察：以存储中已持久化的最大计数器为基线，没有历史时以首次读数为基线
//! - 单个三元组读取失败只跳过该三元组；PLC断开时整个周期跳过
//!
//! ## 致命错误
//! 计数器映射出现倒退推进属于内部状态损坏，任务直接 panic，
//! 由调度器以全新基线重启。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::models::structs::MeasurementRecord;
use crate::services::domain::periodic_scheduler::{CycleProgress, CycleTask, PeriodicScheduler, Ticker};
use crate::services::infrastructure::plc::{ITagAddressResolver, ITagReader};
use crate::services::traits::{ISnapshotStore, SaveOutcome};
use crate::utils::config::{expand_monitored_groups, CaptureConfig, CaptureTarget};
use crate::utils::error::{AppError, AppResult};
use crate::utils::time_utils::Clock;

/// 最后已见计数器映射
///
/// 由采集任务独占持有，随任务一起移动进调度循环。
#[derive(Debug, Default)]
pub struct CounterLedger {
    last_seen: HashMap<CaptureTarget, u64>,
}

impl CounterLedger {
    pub fn get(&self, target: &CaptureTarget) -> Option<u64> {
        self.last_seen.get(target).copied()
    }

    /// 无条件设置基线（首次观察或计数器复位）
    pub fn rebaseline(&mut self, target: CaptureTarget, value: u64) {
        self.last_seen.insert(target, value);
    }

    /// 采集成功后推进
    ///
    /// # Panics
    /// 推进值小于当前值说明映射已损坏。
    pub fn advance(&mut self, target: CaptureTarget, value: u64) {
        if let Some(previous) = self.last_seen.get(&target) {
            if value < *previous {
                panic!("计数器映射损坏: {} 从 {} 倒退推进到 {}", target, previous, value);
            }
        }
        self.last_seen.insert(target, value);
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// 单个采集周期的报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureCycleReport {
    pub started_at: Option<DateTime<Utc>>,
    /// PLC断开，整个周期被跳过
    pub skipped_disconnected: bool,
    /// 完成轮询的三元组数
    pub targets_polled: usize,
    /// 计数器或测量组读取失败数
    pub read_failures: usize,
    /// 新写入的记录数
    pub captures: usize,
    /// 存储判定为重复的保存数
    pub duplicates: usize,
    /// 保存失败数（下周期重试）
    pub persistence_failures: usize,
    /// 首次观察建立的基线数
    pub baselines: usize,
    /// 计数器复位次数
    pub resets: usize,
    /// 因软截止时间未轮询的三元组数
    pub deadline_skipped: usize,
}

/// 引擎与外部观察者共享的状态
#[derive(Debug)]
struct CaptureShared {
    plc_connected: AtomicBool,
    captures_total: AtomicU64,
}

/// 采集引擎状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEngineStatus {
    pub enabled: bool,
    pub running: bool,
    pub polling_interval_ms: u64,
    pub plc_connected: bool,
    pub monitored_targets: usize,
    pub cycles_completed: u64,
    pub restarts: u64,
    pub captures_total: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// 单个采集周期任务
pub struct CaptureCycle {
    targets: Arc<Vec<CaptureTarget>>,
    reader: Arc<dyn ITagReader>,
    store: Arc<dyn ISnapshotStore>,
    resolver: Arc<dyn ITagAddressResolver>,
    clock: Arc<dyn Clock>,
    soft_deadline: Option<Duration>,
    shared: Arc<CaptureShared>,
    ledger: CounterLedger,
    /// 上个周期因软截止时间中断的位置，本周期从这里开始
    next_offset: usize,
}

impl CaptureCycle {
    fn mark_connected(&self, connected: bool) {
        let previous = self.shared.plc_connected.swap(connected, Ordering::SeqCst);
        if previous && !connected {
            crate::log_communication_failure!("[CAPTURE] PLC连接断开，采集暂停");
        } else if !previous && connected {
            log::info!("🔌 [CAPTURE] PLC连接恢复，继续采集");
        }
    }

    /// 读取测量组，任一字段失败则整组失败
    async fn read_group(&self, target: &CaptureTarget) -> AppResult<serde_json::Value> {
        let mut payload = serde_json::Map::new();
        for (field, node_id) in self.resolver.measurement_group(target.block, target.valve, target.measurement_type) {
            let value = self.reader.read(&node_id).await?;
            payload.insert(field, value.to_json());
        }
        Ok(serde_json::Value::Object(payload))
    }

    /// 确定三元组的最后已见值；首次观察时建立基线并返回 None
    async fn last_seen_or_baseline(
        &mut self,
        target: CaptureTarget,
        observed: u64,
        report: &mut CaptureCycleReport,
    ) -> Option<u64> {
        if let Some(last_seen) = self.ledger.get(&target) {
            return Some(last_seen);
        }

        let persisted = match self
            .store
            .latest_counter_value(target.block, target.valve, target.measurement_type)
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                log::warn!("⚠️ [CAPTURE] {} 查询历史计数器失败，以当前读数为基线: {}", target, e);
                None
            }
        };

        match persisted {
            Some(persisted) if persisted <= observed => {
                log::debug!("[CAPTURE] {} 以已持久化计数器 {} 为基线", target, persisted);
                self.ledger.rebaseline(target, persisted);
                Some(persisted)
            }
            _ => {
                log::debug!("[CAPTURE] {} 首次观察，基线 {}", target, observed);
                self.ledger.rebaseline(target, observed);
                report.baselines += 1;
                None
            }
        }
    }

    /// 轮询单个三元组；只有连接错误会向上返回以中止本周期
    async fn poll_target(&mut self, target: CaptureTarget, report: &mut CaptureCycleReport) -> AppResult<()> {
        let counter_node = self.resolver.ready_counter(target.block, target.valve, target.measurement_type);
        let observed = match self.reader.read_u64(&counter_node).await {
            Ok(value) => value,
            Err(e @ AppError::ConnectivityError { .. }) => return Err(e),
            Err(e) => {
                log::warn!("⚠️ [CAPTURE] {} 计数器读取失败，跳过: {}", target, e);
                report.read_failures += 1;
                return Ok(());
            }
        };
        report.targets_polled += 1;

        let last_seen = match self.last_seen_or_baseline(target, observed, report).await {
            Some(last_seen) => last_seen,
            None => return Ok(()),
        };

        if observed < last_seen {
            log::info!("🔄 [CAPTURE] {} 计数器复位 {} -> {}，重新建立基线", target, last_seen, observed);
            self.ledger.rebaseline(target, observed);
            report.resets += 1;
            return Ok(());
        }
        if observed == last_seen {
            return Ok(());
        }

        let payload = match self.read_group(&target).await {
            Ok(payload) => payload,
            Err(e @ AppError::ConnectivityError { .. }) => return Err(e),
            Err(e) => {
                log::warn!("⚠️ [CAPTURE] {} 测量组读取失败，下周期重试: {}", target, e);
                report.read_failures += 1;
                return Ok(());
            }
        };

        let record = MeasurementRecord::new(
            target.block,
            target.valve,
            target.measurement_type,
            observed,
            payload,
            self.clock.now(),
        );
        match self.store.save_measurement(&record).await {
            Ok(SaveOutcome::Inserted(id)) => {
                self.ledger.advance(target, observed);
                report.captures += 1;
                self.shared.captures_total.fetch_add(1, Ordering::SeqCst);
                log::info!("📸 [CAPTURE] 已采集 {} (计数器 {} -> {})", id, last_seen, observed);
            }
            Ok(SaveOutcome::DuplicateNoop(id)) => {
                self.ledger.advance(target, observed);
                report.duplicates += 1;
                log::debug!("[CAPTURE] {} 已存在，幂等跳过", id);
            }
            Err(e) => {
                crate::log_persistence_failure!("[CAPTURE] {} 保存失败，下周期重试: {}", record.id, e);
                report.persistence_failures += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CycleTask for CaptureCycle {
    type Report = CaptureCycleReport;

    async fn run_cycle(&mut self) -> CaptureCycleReport {
        let started = Instant::now();
        let mut report = CaptureCycleReport {
            started_at: Some(self.clock.now()),
            ..Default::default()
        };

        if !self.reader.is_connected() {
            self.mark_connected(false);
            report.skipped_disconnected = true;
            return report;
        }
        self.mark_connected(true);

        let targets = self.targets.clone();
        let total = targets.len();
        let offset = if total == 0 { 0 } else { self.next_offset % total };
        self.next_offset = 0;

        for step in 0..total {
            // 至少轮询一个三元组，截止检查只在三元组之间进行
            if let Some(deadline) = self.soft_deadline {
                if step > 0 && started.elapsed() > deadline {
                    report.deadline_skipped = total - step;
                    self.next_offset = offset + step;
                    log::warn!(
                        "⏰ [CAPTURE] 周期超过软截止时间 {}ms，剩余 {} 个三元组留待下周期",
                        deadline.as_millis(),
                        report.deadline_skipped
                    );
                    break;
                }
            }

            let target = targets[(offset + step) % total];
            if let Err(e) = self.poll_target(target, &mut report).await {
                log::warn!("⚠️ [CAPTURE] 周期中PLC断开，跳过剩余三元组: {}", e);
                self.mark_connected(false);
                report.skipped_disconnected = true;
                break;
            }
        }

        if report.captures > 0 || report.persistence_failures > 0 {
            log::debug!("[CAPTURE] 周期完成: {:?}", report);
        }
        report
    }
}

/// 测量采集引擎
pub struct MeasurementCaptureEngine {
    scheduler: PeriodicScheduler<CaptureCycle>,
    enabled: AtomicBool,
    shared: Arc<CaptureShared>,
    target_count: usize,
}

impl MeasurementCaptureEngine {
    /// 创建引擎（未启动）
    ///
    /// 监控组或轮询间隔无效时返回 `InvalidConfig`。
    pub fn new(
        config: &CaptureConfig,
        reader: Arc<dyn ITagReader>,
        store: Arc<dyn ISnapshotStore>,
        resolver: Arc<dyn ITagAddressResolver>,
        clock: Arc<dyn Clock>,
        ticker: Arc<dyn Ticker>,
    ) -> AppResult<Self> {
        let targets = Arc::new(expand_monitored_groups(&config.monitored_groups)?);
        let target_count = targets.len();
        let soft_deadline = config.cycle_soft_deadline_ms.map(Duration::from_millis);
        let shared = Arc::new(CaptureShared {
            plc_connected: AtomicBool::new(reader.is_connected()),
            captures_total: AtomicU64::new(0),
        });

        let factory_shared = shared.clone();
        let scheduler = PeriodicScheduler::new("MeasurementCapture", config.polling_interval_ms, ticker, move || {
            CaptureCycle {
                targets: targets.clone(),
                reader: reader.clone(),
                store: store.clone(),
                resolver: resolver.clone(),
                clock: clock.clone(),
                soft_deadline,
                shared: factory_shared.clone(),
                ledger: CounterLedger::default(),
                next_offset: 0,
            }
        })?;

        log::info!(
            "📸 [CAPTURE] 采集引擎已创建: {} 个三元组, 间隔 {}ms, 启用={}",
            target_count,
            config.polling_interval_ms,
            config.enabled
        );

        Ok(Self {
            scheduler,
            enabled: AtomicBool::new(config.enabled),
            shared,
            target_count,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 启用或禁用采集；启用时启动循环，禁用时停止循环
    pub async fn set_enabled(&self, enabled: bool) -> AppResult<()> {
        self.enabled.store(enabled, Ordering::SeqCst);
        crate::log_user_operation!("采集引擎启用状态设置为 {}", enabled);
        if enabled {
            self.start().await?;
        } else {
            self.stop().await;
        }
        Ok(())
    }

    pub fn get_polling_interval_ms(&self) -> u64 {
        self.scheduler.interval_ms()
    }

    /// 修改轮询间隔，小于100ms时拒绝并保留原值
    pub fn set_polling_interval_ms(&self, interval_ms: u64) -> AppResult<()> {
        self.scheduler.set_interval_ms(interval_ms).map_err(|e| {
            crate::log_config_warning!("拒绝采集轮询间隔 {}ms: {}", interval_ms, e);
            e
        })
    }

    /// 启动采集循环；未启用或已在运行时为空操作
    pub async fn start(&self) -> AppResult<bool> {
        if !self.is_enabled() {
            log::info!("[CAPTURE] 采集未启用，忽略启动请求");
            return Ok(false);
        }
        Ok(self.scheduler.start().await)
    }

    /// 停止采集循环，等待当前周期完成
    pub async fn stop(&self) -> bool {
        self.scheduler.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// 在未运行时执行一个采集周期
    pub async fn poll_once(&self) -> AppResult<CaptureCycleReport> {
        self.scheduler.run_once().await
    }

    /// 订阅周期进度
    pub fn subscribe(&self) -> watch::Receiver<CycleProgress<CaptureCycleReport>> {
        self.scheduler.subscribe()
    }

    pub fn status(&self) -> CaptureEngineStatus {
        let progress = self.scheduler.progress();
        CaptureEngineStatus {
            enabled: self.is_enabled(),
            running: self.is_running(),
            polling_interval_ms: self.get_polling_interval_ms(),
            plc_connected: self.shared.plc_connected.load(Ordering::SeqCst),
            monitored_targets: self.target_count,
            cycles_completed: progress.cycles,
            restarts: progress.restarts,
            captures_total: self.shared.captures_total.load(Ordering::SeqCst),
            last_cycle_at: progress.last_report.and_then(|r| r.started_at),
        }
    }
}
