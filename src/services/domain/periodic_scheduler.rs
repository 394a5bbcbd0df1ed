//! # 周期调度器 (Periodic Scheduler)
//!
//! ## 业务说明
//! 测量采集引擎和状态缓存都是"固定延迟"的周期循环：一个周期结束后等待一个轮询间隔，
//! 再开始下一个周期。周期之间从不重叠，周期超时只会推迟下一次执行。
//!
//! ## 停止语义
//! - `stop()` 设置协作式取消标志，并等待当前周期完整结束后才返回
//! - 取消标志只在周期之间检查，单个周期内的检测和持久化不会被拆开
//!
//! ## 故障恢复
//! 周期任务 panic（例如计数器映射损坏）时，监督任务用工厂方法创建一个全新的任务实例
//! （全新基线）并在一个周期间隔后继续运行。
//!
//! ## 可测试性
//! 等待由 [`Ticker`] 提供，测试使用 [`ManualTicker`] 精确地逐个释放周期。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::utils::config::validate_polling_interval;
use crate::utils::error::{AppError, AppResult};

/// 单个周期任务
///
/// 任务的可变状态由任务自身持有，被移动进调度循环，外部只能通过共享的只读视图观察。
#[async_trait]
pub trait CycleTask: Send + 'static {
    /// 每个周期的执行报告
    type Report: Clone + Send + Sync + 'static;

    /// 执行一个完整周期
    async fn run_cycle(&mut self) -> Self::Report;
}

/// 周期间的等待
#[async_trait]
pub trait Ticker: Send + Sync + 'static {
    async fn wait(&self, period: Duration);
}

/// 基于 tokio 定时器的等待
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn wait(&self, period: Duration) {
        tokio::time::sleep(period).await;
    }
}

/// 手动等待：每次 `advance(n)` 释放 n 个周期
#[derive(Debug)]
pub struct ManualTicker {
    permits: Semaphore,
    last_period: std::sync::Mutex<Option<Duration>>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
            last_period: std::sync::Mutex::new(None),
        }
    }

    /// 释放 n 次等待
    pub fn advance(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// 最近一次等待请求的周期
    pub fn last_period(&self) -> Option<Duration> {
        *self.last_period.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualTicker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn wait(&self, period: Duration) {
        *self.last_period.lock().unwrap_or_else(|e| e.into_inner()) = Some(period);
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// 周期进度，通过 watch 通道发布
#[derive(Debug, Clone)]
pub struct CycleProgress<R> {
    /// 已完成的周期数（含 run_once）
    pub cycles: u64,
    /// 循环因 panic 重启的次数
    pub restarts: u64,
    /// 最近一个周期的报告
    pub last_report: Option<R>,
}

impl<R> Default for CycleProgress<R> {
    fn default() -> Self {
        Self { cycles: 0, restarts: 0, last_report: None }
    }
}

type TaskFactory<T> = Arc<dyn Fn() -> T + Send + Sync>;

enum SchedulerState<T> {
    Idle(Option<T>),
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<T>,
    },
}

/// 循环共享的上下文
struct LoopContext<T: CycleTask> {
    name: &'static str,
    interval_ms: Arc<AtomicU64>,
    ticker: Arc<dyn Ticker>,
    factory: TaskFactory<T>,
    progress: watch::Sender<CycleProgress<T::Report>>,
}

impl<T: CycleTask> Clone for LoopContext<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            interval_ms: self.interval_ms.clone(),
            ticker: self.ticker.clone(),
            factory: self.factory.clone(),
            progress: self.progress.clone(),
        }
    }
}

impl<T: CycleTask> LoopContext<T> {
    fn period(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    fn publish(&self, report: T::Report) {
        self.progress.send_modify(|p| {
            p.cycles += 1;
            p.last_report = Some(report);
        });
    }
}

/// 周期调度器
pub struct PeriodicScheduler<T: CycleTask> {
    ctx: LoopContext<T>,
    state: Mutex<SchedulerState<T>>,
    running: AtomicBool,
}

impl<T: CycleTask> PeriodicScheduler<T> {
    /// 创建调度器（未启动）
    ///
    /// `factory` 在首次启动和 panic 重启时创建全新的任务实例。
    pub fn new<F>(name: &'static str, interval_ms: u64, ticker: Arc<dyn Ticker>, factory: F) -> AppResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        validate_polling_interval(interval_ms)?;
        let (progress, _) = watch::channel(CycleProgress::default());
        Ok(Self {
            ctx: LoopContext {
                name,
                interval_ms: Arc::new(AtomicU64::new(interval_ms)),
                ticker,
                factory: Arc::new(factory),
                progress,
            },
            state: Mutex::new(SchedulerState::Idle(None)),
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.ctx.name
    }

    /// 当前轮询间隔（毫秒）
    pub fn interval_ms(&self) -> u64 {
        self.ctx.interval_ms.load(Ordering::SeqCst)
    }

    /// 修改轮询间隔，从下一次调度开始生效
    ///
    /// 小于100ms时返回 `InvalidConfig`，原间隔保持不变。
    pub fn set_interval_ms(&self, interval_ms: u64) -> AppResult<()> {
        validate_polling_interval(interval_ms)?;
        let previous = self.ctx.interval_ms.swap(interval_ms, Ordering::SeqCst);
        log::info!("⏱️ [SCHEDULER] {} 轮询间隔 {}ms -> {}ms", self.ctx.name, previous, interval_ms);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 订阅周期进度
    pub fn subscribe(&self) -> watch::Receiver<CycleProgress<T::Report>> {
        self.ctx.progress.subscribe()
    }

    /// 当前进度快照
    pub fn progress(&self) -> CycleProgress<T::Report> {
        self.ctx.progress.borrow().clone()
    }

    /// 启动循环；已在运行时为空操作，返回 false
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;
        let task = match &mut *state {
            SchedulerState::Running { .. } => return false,
            SchedulerState::Idle(slot) => slot.take().unwrap_or_else(|| (self.ctx.factory)()),
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(task, cancel.clone(), self.ctx.clone()));
        *state = SchedulerState::Running { cancel, handle };
        self.running.store(true, Ordering::SeqCst);
        log::info!("▶️ [SCHEDULER] {} 已启动，间隔 {}ms", self.ctx.name, self.interval_ms());
        true
    }

    /// 停止循环并等待当前周期结束；未运行时为空操作，返回 false
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let (cancel, handle) = match std::mem::replace(&mut *state, SchedulerState::Idle(None)) {
            SchedulerState::Running { cancel, handle } => (cancel, handle),
            idle => {
                *state = idle;
                return false;
            }
        };

        cancel.cancel();
        let task = match handle.await {
            Ok(task) => task,
            Err(e) => {
                log::error!("❌ [SCHEDULER] {} 循环异常退出: {}，使用新的任务实例", self.ctx.name, e);
                (self.ctx.factory)()
            }
        };
        *state = SchedulerState::Idle(Some(task));
        self.running.store(false, Ordering::SeqCst);
        log::info!("⏹️ [SCHEDULER] {} 已停止", self.ctx.name);
        true
    }

    /// 在未运行时手动执行一个周期
    pub async fn run_once(&self) -> AppResult<T::Report> {
        let mut state = self.state.lock().await;
        let mut task = match &mut *state {
            SchedulerState::Running { .. } => {
                return Err(AppError::concurrency_error(format!(
                    "{} 正在运行，不能手动执行周期",
                    self.ctx.name
                )))
            }
            SchedulerState::Idle(slot) => slot.take().unwrap_or_else(|| (self.ctx.factory)()),
        };

        let outcome = tokio::spawn(async move {
            let report = task.run_cycle().await;
            (task, report)
        })
        .await;

        match outcome {
            Ok((task, report)) => {
                *state = SchedulerState::Idle(Some(task));
                self.ctx.publish(report.clone());
                Ok(report)
            }
            Err(e) => {
                log::error!("❌ [SCHEDULER] {} 手动周期异常: {}，任务已重置", self.ctx.name, e);
                *state = SchedulerState::Idle(Some((self.ctx.factory)()));
                self.ctx.progress.send_modify(|p| p.restarts += 1);
                Err(AppError::concurrency_error(format!("{} 周期异常: {}", self.ctx.name, e)))
            }
        }
    }
}

impl<T: CycleTask> Drop for PeriodicScheduler<T> {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            if let SchedulerState::Running { cancel, .. } = &*state {
                cancel.cancel();
            }
        }
    }
}

/// 监督任务：周期循环 panic 后用新任务重启
async fn supervise<T: CycleTask>(initial: T, cancel: CancellationToken, ctx: LoopContext<T>) -> T {
    let mut task = initial;
    loop {
        let inner = tokio::spawn(run_loop(task, cancel.clone(), ctx.clone()));
        match inner.await {
            Ok(task) => return task,
            Err(e) => {
                log::error!(
                    "💥 [SCHEDULER] {} 周期任务崩溃: {}，以全新基线重启",
                    ctx.name,
                    e
                );
                ctx.progress.send_modify(|p| p.restarts += 1);
                task = (ctx.factory)();
                tokio::select! {
                    _ = cancel.cancelled() => return task,
                    _ = ctx.ticker.wait(ctx.period()) => {}
                }
            }
        }
    }
}

/// 固定延迟的周期循环
async fn run_loop<T: CycleTask>(mut task: T, cancel: CancellationToken, ctx: LoopContext<T>) -> T {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let report = task.run_cycle().await;
        ctx.publish(report);

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ctx.ticker.wait(ctx.period()) => {}
        }
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// 记录周期次数的简单任务，可配置在指定周期 panic
    struct CountingTask {
        cycles: Arc<AtomicUsize>,
        generation: usize,
        panic_on_cycle: Option<usize>,
        local_cycles: usize,
    }

    #[async_trait]
    impl CycleTask for CountingTask {
        type Report = (usize, usize);

        async fn run_cycle(&mut self) -> Self::Report {
            self.local_cycles += 1;
            if Some(self.local_cycles) == self.panic_on_cycle {
                panic!("模拟计数器映射损坏");
            }
            self.cycles.fetch_add(1, Ordering::SeqCst);
            (self.generation, self.local_cycles)
        }
    }

    fn scheduler(
        ticker: Arc<ManualTicker>,
        panic_on_first_generation: Option<usize>,
    ) -> (PeriodicScheduler<CountingTask>, Arc<AtomicUsize>) {
        let cycles = Arc::new(AtomicUsize::new(0));
        let generation = Arc::new(AtomicUsize::new(0));
        let counter = cycles.clone();
        let scheduler = PeriodicScheduler::new("test", 100, ticker, move || {
            let gen = generation.fetch_add(1, Ordering::SeqCst);
            CountingTask {
                cycles: counter.clone(),
                generation: gen,
                panic_on_cycle: if gen == 0 { panic_on_first_generation } else { None },
                local_cycles: 0,
            }
        })
        .unwrap();
        (scheduler, cycles)
    }

    async fn wait_cycles<R: Clone>(rx: &mut watch::Receiver<CycleProgress<R>>, n: u64) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| p.cycles >= n))
            .await
            .expect("等待周期超时")
            .expect("进度通道已关闭");
    }

    #[tokio::test]
    async fn test_cycles_advance_only_when_ticker_releases() {
        let ticker = Arc::new(ManualTicker::new());
        let (scheduler, cycles) = scheduler(ticker.clone(), None);
        let mut rx = scheduler.subscribe();

        assert!(scheduler.start().await);
        assert!(!scheduler.start().await, "重复启动应为空操作");
        wait_cycles(&mut rx, 1).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 1);

        ticker.advance(2);
        wait_cycles(&mut rx, 3).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 3);

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await, "重复停止应为空操作");
        assert!(!scheduler.is_running());
        assert_eq!(cycles.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_interval_change_applies_to_next_wait() {
        let ticker = Arc::new(ManualTicker::new());
        let (scheduler, _) = scheduler(ticker.clone(), None);
        let mut rx = scheduler.subscribe();
        scheduler.start().await;
        wait_cycles(&mut rx, 1).await;

        let err = scheduler.set_interval_ms(50).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert_eq!(scheduler.interval_ms(), 100);

        scheduler.set_interval_ms(250).unwrap();
        ticker.advance(1);
        wait_cycles(&mut rx, 2).await;
        // 第二个周期结束后的等待使用新间隔
        tokio::time::timeout(Duration::from_secs(5), async {
            while ticker.last_period() != Some(Duration::from_millis(250)) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_run_once_rejected_while_running() {
        let ticker = Arc::new(ManualTicker::new());
        let (scheduler, cycles) = scheduler(ticker, None);

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report, (0, 1));
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report, (0, 2), "手动周期应复用同一个任务实例");

        scheduler.start().await;
        assert!(scheduler.run_once().await.is_err());
        scheduler.stop().await;
        assert!(cycles.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_panicking_cycle_restarts_with_fresh_task() {
        let ticker = Arc::new(ManualTicker::new());
        let (scheduler, _) = scheduler(ticker.clone(), Some(2));
        let mut rx = scheduler.subscribe();

        scheduler.start().await;
        wait_cycles(&mut rx, 1).await;

        // 第二个周期 panic，监督任务等待一个间隔后以第二代任务重启
        ticker.advance(1);
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| p.restarts == 1))
            .await
            .unwrap()
            .unwrap();
        ticker.advance(1);
        wait_cycles(&mut rx, 2).await;

        assert_eq!(scheduler.progress().last_report, Some((1, 1)));
        assert!(scheduler.is_running());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_cycle_in_progress() {
        struct SlowTask {
            finished: Arc<AtomicBool>,
        }

        #[async_trait]
        impl CycleTask for SlowTask {
            type Report = ();
            async fn run_cycle(&mut self) -> Self::Report {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.finished.store(true, Ordering::SeqCst);
            }
        }

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let scheduler = PeriodicScheduler::new("slow", 100, Arc::new(TokioTicker), move || SlowTask {
            finished: flag.clone(),
        })
        .unwrap();

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.stop().await;
        assert!(finished.load(Ordering::SeqCst), "stop 必须等待当前周期完成");
    }

    #[test]
    fn test_new_rejects_interval_below_floor() {
        let result = PeriodicScheduler::new("bad", 99, Arc::new(TokioTicker), || CountingTask {
            cycles: Arc::new(AtomicUsize::new(0)),
            generation: 0,
            panic_on_cycle: None,
            local_cycles: 0,
        });
        assert!(result.is_err());
    }
}
