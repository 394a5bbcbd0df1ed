/// 应用层服务模块
///
/// 应用层负责装配领域服务和基础设施服务，对外提供台架的启动、停止和设置接口

/// 台架监督服务 - 组合根和采集设置接口
pub mod bench_supervisor;

// 重新导出主要的服务
pub use bench_supervisor::{BenchComponents, BenchStatus, BenchSupervisor};
