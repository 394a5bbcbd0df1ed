/// 串行化的共享标签读取器
///
/// 采集引擎、状态缓存和测试生命周期共用同一个逻辑PLC连接。
/// 本包装器持有唯一的底层句柄，并以调用为粒度做互斥：
/// 任意时刻只有一个读/写请求在底层连接上执行，请求之间可以交错。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::models::structs::TagValue;
use crate::services::traits::BaseService;
use crate::utils::error::{AppError, AppResult};
use super::tag_reader::ITagReader;

#[derive(Clone)]
pub struct SerializedTagReader {
    inner: Arc<dyn ITagReader>,
    call_lock: Arc<Mutex<()>>,
    /// 单次调用超时，None 表示不限制
    call_timeout: Option<Duration>,
}

impl SerializedTagReader {
    pub fn new(inner: Arc<dyn ITagReader>) -> Self {
        Self {
            inner,
            call_lock: Arc::new(Mutex::new(())),
            call_timeout: None,
        }
    }

    /// 设置单次调用超时（毫秒），0 表示不限制
    pub fn with_call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.call_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        self
    }

    async fn guarded<T, F>(&self, node_id: &str, fut: F) -> AppResult<T>
    where
        F: std::future::Future<Output = AppResult<T>> + Send,
    {
        let _guard = self.call_lock.lock().await;
        match self.call_timeout {
            Some(limit) => timeout(limit, fut).await.map_err(|_| {
                AppError::node_read_error(node_id, format!("调用超时 ({}ms)", limit.as_millis()))
            })?,
            None => fut.await,
        }
    }
}

#[async_trait]
impl BaseService for SerializedTagReader {
    fn service_name(&self) -> &'static str {
        "SerializedTagReader"
    }

    async fn health_check(&self) -> AppResult<()> {
        self.inner.health_check().await
    }
}

#[async_trait]
impl ITagReader for SerializedTagReader {
    async fn read(&self, node_id: &str) -> AppResult<TagValue> {
        self.guarded(node_id, self.inner.read(node_id)).await
    }

    async fn write(&self, node_id: &str, value: TagValue) -> AppResult<()> {
        self.guarded(node_id, self.inner.write(node_id, value)).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}
