/// 阀门测试台架监督系统 - Rust后端核心库
///
/// - 测量采集引擎：检测PLC测量完成计数器并持久化测量记录
/// - 状态缓存：为仪表盘发布各工位的状态快照
/// - 测试运行生命周期：测试运行状态机与阀门锁定掩码
pub mod models;
pub mod utils;
pub mod services;
pub mod logging;

// 重新导出常用类型，方便使用
pub use models::*;
pub use utils::{AppError, AppResult, AppConfig};
pub use services::*;
