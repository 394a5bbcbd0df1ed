/// 基础设施层服务模块
/// 负责与外部系统的交互，如PLC标签访问、数据持久化等

/// PLC标签访问相关模块
pub mod plc;

/// 数据持久化相关模块
pub mod persistence;

// 重新导出常用接口和实现
pub use plc::*;
pub use persistence::*;
