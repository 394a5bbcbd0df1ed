/// 领域服务层模块
/// 包含测量采集、状态缓存和测试运行生命周期等核心业务逻辑

/// 周期调度器 - 固定延迟循环、协作式停止和崩溃重启
pub mod periodic_scheduler;

/// 测量采集引擎 - 检测计数器增加并持久化测量记录
pub mod measurement_capture_engine;

/// 状态缓存服务 - 为仪表盘发布工位状态快照
pub mod status_cache_service;

/// 测试运行生命周期 - 测试运行状态机
pub mod test_run_lifecycle;

/// 阀门锁定掩码编解码
pub mod valve_sperre;

// 重新导出常用类型
pub use periodic_scheduler::{CycleProgress, CycleTask, ManualTicker, PeriodicScheduler, Ticker, TokioTicker};
pub use measurement_capture_engine::{
    CaptureCycleReport, CaptureEngineStatus, CounterLedger, MeasurementCaptureEngine,
};
pub use status_cache_service::{StatusCacheService, StatusCacheStatus, StatusRefreshReport};
pub use test_run_lifecycle::{ITestRunLifecycle, TestRunLifecycle, ValveUsage};
pub use valve_sperre::{decode_valve_sperre, encode_valve_sperre, valve_sperre_from_configs};
