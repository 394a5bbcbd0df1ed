/// Mock 标签读取服务实现
/// 用于开发和测试阶段，模拟真实PLC的标签读写行为

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::models::structs::TagValue;
use crate::services::traits::BaseService;
use crate::utils::error::{AppError, AppResult};
use super::tag_reader::{ITagReader, TagReaderStats};

/// 写入操作记录
/// 用于测试验证写入操作是否按预期执行
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation {
    /// 写入时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// 节点ID
    pub node_id: String,
    /// 写入的值
    pub value: TagValue,
}

/// Mock 标签读取服务
///
/// 所有状态都在内部可变容器中，克隆出的实例共享同一个模拟PLC，
/// 测试可以在引擎运行时从外部修改计数器或断开连接。
#[derive(Clone)]
pub struct MockTagReader {
    /// 节点当前值（节点ID -> 值）
    data_storage: Arc<Mutex<HashMap<String, TagValue>>>,
    /// 脚本化的值序列：每次读取弹出一个，最后一个值保持
    scripted: Arc<Mutex<HashMap<String, VecDeque<TagValue>>>>,
    /// 持续读取失败的节点
    failing_nodes: Arc<Mutex<HashSet<String>>>,
    /// 每个节点的读取次数
    read_counts: Arc<Mutex<HashMap<String, u64>>>,
    /// 写入操作记录
    write_log: Arc<Mutex<Vec<WriteOperation>>>,
    /// 通信统计信息
    stats: Arc<Mutex<TagReaderStats>>,
    /// 连接状态
    connected: Arc<AtomicBool>,
    /// 单次读取的模拟延迟（毫秒）
    read_delay_ms: Arc<Mutex<u64>>,
    /// 随机读取错误率（0.0-1.0）
    error_rate: Arc<Mutex<f64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTagReader {
    /// 创建新的 Mock 实例，默认已连接、无延迟、无随机错误
    pub fn new() -> Self {
        Self {
            data_storage: Arc::new(Mutex::new(HashMap::new())),
            scripted: Arc::new(Mutex::new(HashMap::new())),
            failing_nodes: Arc::new(Mutex::new(HashSet::new())),
            read_counts: Arc::new(Mutex::new(HashMap::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(TagReaderStats::default())),
            connected: Arc::new(AtomicBool::new(true)),
            read_delay_ms: Arc::new(Mutex::new(0)),
            error_rate: Arc::new(Mutex::new(0.0)),
        }
    }

    /// 预设读取值
    pub fn preset_value(&self, node_id: impl Into<String>, value: impl Into<TagValue>) {
        lock(&self.data_storage).insert(node_id.into(), value.into());
    }

    /// 预设多个读取值
    pub fn preset_values<I, K, V>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TagValue>,
    {
        let mut storage = lock(&self.data_storage);
        for (node_id, value) in values {
            storage.insert(node_id.into(), value.into());
        }
    }

    /// 为节点设置值序列，每次读取依次返回，序列耗尽后保持最后一个值
    pub fn script_values<V: Into<TagValue>>(&self, node_id: impl Into<String>, values: Vec<V>) {
        let queue: VecDeque<TagValue> = values.into_iter().map(Into::into).collect();
        lock(&self.scripted).insert(node_id.into(), queue);
    }

    /// 让节点持续读取失败
    pub fn fail_node(&self, node_id: impl Into<String>) {
        lock(&self.failing_nodes).insert(node_id.into());
    }

    /// 恢复节点读取
    pub fn heal_node(&self, node_id: &str) {
        lock(&self.failing_nodes).remove(node_id);
    }

    /// 设置连接状态
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        log::info!("[MOCK_PLC] 连接状态切换为 {}", if connected { "已连接" } else { "已断开" });
    }

    /// 设置读取延迟
    pub fn set_read_delay(&self, delay_ms: u64) {
        *lock(&self.read_delay_ms) = delay_ms;
    }

    /// 设置随机错误率
    pub fn set_error_simulation(&self, error_rate: f64) {
        *lock(&self.error_rate) = error_rate.clamp(0.0, 1.0);
    }

    /// 当前存储的值（不计入读取统计）
    pub fn peek(&self, node_id: &str) -> Option<TagValue> {
        lock(&self.data_storage).get(node_id).cloned()
    }

    /// 节点被读取的次数
    pub fn read_count(&self, node_id: &str) -> u64 {
        lock(&self.read_counts).get(node_id).copied().unwrap_or(0)
    }

    /// 获取写入日志
    pub fn get_write_log(&self) -> Vec<WriteOperation> {
        lock(&self.write_log).clone()
    }

    /// 检查是否写入了指定节点
    pub fn was_node_written(&self, node_id: &str) -> bool {
        lock(&self.write_log).iter().any(|op| op.node_id == node_id)
    }

    /// 通信统计快照
    pub fn get_stats(&self) -> TagReaderStats {
        lock(&self.stats).clone()
    }

    fn update_stats<F>(&self, updater: F)
    where
        F: FnOnce(&mut TagReaderStats),
    {
        let mut stats = lock(&self.stats);
        updater(&mut stats);
        stats.last_communication_time = Some(Utc::now());
    }

    fn should_simulate_error(&self) -> bool {
        let rate = *lock(&self.error_rate);
        rate > 0.0 && rand::thread_rng().gen::<f64>() < rate
    }

    fn next_value(&self, node_id: &str) -> Option<TagValue> {
        {
            let mut scripted = lock(&self.scripted);
            if let Some(queue) = scripted.get_mut(node_id) {
                let value = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
                if let Some(value) = value {
                    lock(&self.data_storage).insert(node_id.to_string(), value.clone());
                    return Some(value);
                }
            }
        }
        lock(&self.data_storage).get(node_id).cloned()
    }
}

impl Default for MockTagReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseService for MockTagReader {
    fn service_name(&self) -> &'static str {
        "MockTagReader"
    }

    async fn health_check(&self) -> AppResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AppError::connectivity_error("Mock PLC 未连接"))
        }
    }
}

#[async_trait]
impl ITagReader for MockTagReader {
    async fn read(&self, node_id: &str) -> AppResult<TagValue> {
        let delay_ms = *lock(&self.read_delay_ms);
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        *lock(&self.read_counts).entry(node_id.to_string()).or_insert(0) += 1;

        if !self.is_connected() {
            self.update_stats(|stats| stats.failed_reads += 1);
            return Err(AppError::connectivity_error("PLC未连接"));
        }
        if lock(&self.failing_nodes).contains(node_id) || self.should_simulate_error() {
            self.update_stats(|stats| stats.failed_reads += 1);
            return Err(AppError::node_read_error(node_id, "模拟读取错误"));
        }

        match self.next_value(node_id) {
            Some(value) => {
                self.update_stats(|stats| stats.successful_reads += 1);
                Ok(value)
            }
            None => {
                self.update_stats(|stats| stats.failed_reads += 1);
                Err(AppError::node_read_error(node_id, "节点不存在"))
            }
        }
    }

    async fn write(&self, node_id: &str, value: TagValue) -> AppResult<()> {
        if !self.is_connected() {
            self.update_stats(|stats| stats.failed_writes += 1);
            return Err(AppError::connectivity_error("PLC未连接"));
        }
        lock(&self.data_storage).insert(node_id.to_string(), value.clone());
        lock(&self.write_log).push(WriteOperation {
            timestamp: Utc::now(),
            node_id: node_id.to_string(),
            value,
        });
        self.update_stats(|stats| stats.successful_writes += 1);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
