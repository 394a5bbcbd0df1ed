/// PLC标签访问相关模块

/// 标签读取接口定义
pub mod tag_reader;

/// Mock 标签读取实现（用于开发、模拟台架和测试）
pub mod mock_tag_reader;

/// 调用级互斥的共享读取器
pub mod serialized_tag_reader;

/// 节点ID命名约定
pub mod tag_address;

/// 单元测试模块
#[cfg(test)]
pub mod tests;

// 重新导出主要接口和类型
pub use tag_reader::*;
pub use mock_tag_reader::*;
pub use serialized_tag_reader::SerializedTagReader;
pub use tag_address::*;
