//! 配置模型与校验
//!
//! TOML文件加 TIMER_ 前缀环境变量构成最终配置, 加载即校验。

pub mod models;
pub mod validation;

pub use models::{AppConfig, ClusterConfig, EngineConfig, ObservabilityConfig};
pub use validation::{ConfigValidator, ValidationUtils};
