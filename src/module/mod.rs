//! 模块管理模块
//!
//! 包含模块管理系统的核心组件：
//! - 模块接口与元数据定义
//! - 模块状态机
//! - 模块注册表
//! - 模块源接口
//! - 模块管理器

pub mod api;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod source;
pub mod state;

// 重导出常用类型
pub use api::{share_module, Module, ModuleFactory, SharedModule};
pub use manager::{ManagerConfig, ModuleManager, StartFailurePolicy};
pub use metadata::{ConfigMap, ConfigSchema, ConfigValueType, ModuleMetadata};
pub use registry::{ModuleRegistry, ModuleSnapshot, RegistryEntry};
pub use source::{ModuleSource, StaticModuleSource};
pub use state::ModuleState;
