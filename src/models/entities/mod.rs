// 文件: src/models/entities/mod.rs
// 声明 entities 模块下的所有实体

pub mod measurement_snapshot;
pub mod test_run;
pub mod parameter_set;
