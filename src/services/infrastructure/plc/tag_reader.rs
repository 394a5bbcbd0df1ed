/// PLC标签读取接口定义及相关数据结构
///
/// 协议客户端（连线、订阅、编码）由外部实现，本模块只定义台架监控需要的最小能力：
/// 按节点ID读、写，以及报告连接状态。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::models::structs::TagValue;
use crate::services::traits::BaseService;
use crate::utils::error::{AppError, AppResult};

/// 标签读写统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagReaderStats {
    /// 成功读取次数
    pub successful_reads: u64,
    /// 失败读取次数
    pub failed_reads: u64,
    /// 成功写入次数
    pub successful_writes: u64,
    /// 失败写入次数
    pub failed_writes: u64,
    /// 最后一次通信时间
    pub last_communication_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// PLC标签读取服务接口
///
/// 实现必须是 `Send + Sync`，由两个周期循环和测试生命周期共享。
#[async_trait]
pub trait ITagReader: BaseService {
    /// 读取单个节点
    async fn read(&self, node_id: &str) -> AppResult<TagValue>;

    /// 写入单个节点
    async fn write(&self, node_id: &str, value: TagValue) -> AppResult<()>;

    /// 当前是否连接
    fn is_connected(&self) -> bool;

    /// 读取无符号计数器
    async fn read_u64(&self, node_id: &str) -> AppResult<u64> {
        let value = self.read(node_id).await?;
        value.as_u64().ok_or_else(|| {
            AppError::node_read_error(node_id, format!("期望无符号整数，实际为 {:?}", value))
        })
    }

    /// 读取布尔值
    async fn read_bool(&self, node_id: &str) -> AppResult<bool> {
        let value = self.read(node_id).await?;
        value.as_bool().ok_or_else(|| {
            AppError::node_read_error(node_id, format!("期望布尔值，实际为 {:?}", value))
        })
    }

    /// 读取浮点值
    async fn read_f64(&self, node_id: &str) -> AppResult<f64> {
        let value = self.read(node_id).await?;
        value.as_f64().ok_or_else(|| {
            AppError::node_read_error(node_id, format!("期望浮点数，实际为 {:?}", value))
        })
    }
}
