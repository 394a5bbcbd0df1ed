use chrono::{DateTime, Duration, Local, Utc};
use std::sync::{Arc, Mutex};

/// 可注入的时钟
///
/// 快照时间戳、测试运行开始/结束时间都通过该接口获取，
/// 测试中使用 [`ManualClock`] 得到确定的时间。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟，只在显式推进时前进
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(start)) }
    }

    /// 推进指定毫秒
    pub fn advance_ms(&self, ms: i64) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard += Duration::milliseconds(ms);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 当前本地时间，带毫秒的日志时间戳格式
#[inline]
pub fn log_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
