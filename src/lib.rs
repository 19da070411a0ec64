//! # Chips Modules - 薯片模块生命周期管理
//!
//! 薯片生态的模块生命周期管理库，提供以下核心功能：
//!
//! - **模块管理**: 模块的发现、加载、安装、启动、停止与卸载
//! - **依赖解析**: 依赖图、拓扑排序与循环依赖检测
//! - **状态机**: 模块生命周期的状态转换约束
//! - **事件总线**: 生命周期事件的模式化发布订阅
//! - **热重载**: 运行中重新实例化模块并恢复依赖者
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use chips_modules::{
//!     ManagerConfig, Module, ModuleManager, ModuleMetadata, StaticModuleSource,
//! };
//! use chips_modules::utils::Result;
//!
//! struct CacheModule;
//!
//! #[async_trait]
//! impl Module for CacheModule {
//!     fn metadata(&self) -> ModuleMetadata {
//!         ModuleMetadata::new("cache")
//!     }
//!
//!     async fn start(&mut self) -> Result<()> {
//!         println!("缓存模块启动!");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let source = Arc::new(StaticModuleSource::new());
//!     source.register("cache", Arc::new(|| Ok(Box::new(CacheModule)))).await;
//!
//!     let manager = ModuleManager::new(ManagerConfig::default(), source);
//!     manager.load_module("cache").await?;
//!     manager.install_module("cache", None).await?;
//!     manager.start_module("cache").await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块接口、注册表与管理器
//! - `dependency` - 依赖图与依赖解析
//! - `events` - 事件与事件总线
//! - `utils` - 错误类型和日志系统

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod dependency;
pub mod events;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use dependency::{DependencyGraph, DependencyResolver};
pub use events::{module_events, Event, EventBuilder, EventBus, EventBusConfig, EventHandler};
pub use module::{
    ConfigMap, ConfigSchema, ConfigValueType, ManagerConfig, Module, ModuleFactory,
    ModuleManager, ModuleMetadata, ModuleRegistry, ModuleSnapshot, ModuleSource, ModuleState,
    SharedModule, StartFailurePolicy, StaticModuleSource,
};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{ModuleError, Result};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
