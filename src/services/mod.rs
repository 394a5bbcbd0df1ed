/// 服务层模块，包含应用层、领域层和基础设施层的服务定义
///
/// 按照清洁架构原则组织：
/// - Application Layer: 应用服务，装配并协调各个服务
/// - Domain Layer: 领域服务，包含测量采集、状态缓存和测试运行等核心业务逻辑
/// - Infrastructure Layer: 基础设施服务，处理PLC标签访问和数据持久化

/// 应用层服务模块
pub mod application;

/// 领域层服务模块
pub mod domain;

/// 基础设施层服务模块
pub mod infrastructure;

/// 服务层基础trait定义
pub mod traits;

// 重新导出基础trait
pub use traits::{BaseService, ISnapshotStore, SaveOutcome};

// 重新导出应用层服务
pub use application::{BenchComponents, BenchStatus, BenchSupervisor};

// 重新导出领域层服务
pub use domain::{
    ITestRunLifecycle, MeasurementCaptureEngine, StatusCacheService, TestRunLifecycle,
    encode_valve_sperre, decode_valve_sperre,
};
