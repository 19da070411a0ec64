//! 模块接口定义
//!
//! 定义用户模块需要实现的生命周期接口，以及模块工厂和共享实例类型。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::module::metadata::{ConfigMap, ModuleMetadata};
use crate::utils::Result;

/// 模块接口
///
/// 用户模块实现此接口以接入生命周期管理。除 [`Module::metadata`] 外，
/// 所有钩子都有空实现作为默认值，模块只需覆盖自己关心的钩子。
/// 同步逻辑直接写在钩子体内即可（不 `await` 的异步函数就是同步函数）。
///
/// # 示例
///
/// ```rust
/// use async_trait::async_trait;
/// use chips_modules::module::{Module, ModuleMetadata};
/// use chips_modules::utils::Result;
///
/// struct CacheModule;
///
/// #[async_trait]
/// impl Module for CacheModule {
///     fn metadata(&self) -> ModuleMetadata {
///         ModuleMetadata::new("cache").with_dependencies(["database"])
///     }
///
///     async fn start(&mut self) -> Result<()> {
///         println!("缓存模块启动");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Module: Send + Sync {
    /// 获取模块元数据
    ///
    /// 元数据在加载时被注册表缓存，此后不应再变化。
    fn metadata(&self) -> ModuleMetadata;

    /// 模块引导钩子
    ///
    /// 在实例创建后、进入已加载状态前调用一次。
    async fn bootstrap(&mut self) -> Result<()> {
        Ok(())
    }

    /// 安装钩子
    async fn install(&mut self, _config: Option<&ConfigMap>) -> Result<()> {
        Ok(())
    }

    /// 卸载钩子
    async fn uninstall(&mut self) -> Result<()> {
        Ok(())
    }

    /// 启动钩子
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// 停止钩子
    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// 模块级重载钩子
    ///
    /// 管理器的热重载通过重新实例化完成，不调用此钩子；
    /// 嵌入方可以通过实例句柄自行触发。
    async fn reload(&mut self) -> Result<()> {
        Ok(())
    }

    /// 验证配置
    ///
    /// 默认总是通过，模块可覆盖以实现自定义校验。
    /// 返回 `false` 时安装会以配置错误失败且不改变状态。
    fn validate_config(&self, _config: Option<&ConfigMap>) -> bool {
        true
    }
}

/// 模块工厂
///
/// 产出全新的模块实例，用于首次加载与热重载。
pub type ModuleFactory = Arc<dyn Fn() -> Result<Box<dyn Module>> + Send + Sync>;

/// 共享模块实例
///
/// 通过 `get_module` 交给依赖注入使用方的实例句柄。
/// 互斥锁保证同一模块的钩子不会并发执行。
pub type SharedModule = Arc<Mutex<Box<dyn Module>>>;

/// 将模块实例包装为共享句柄
pub fn share_module(module: Box<dyn Module>) -> SharedModule {
    Arc::new(Mutex::new(module))
}
