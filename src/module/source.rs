//! 模块源接口
//!
//! 模块源负责发现模块名称并提供模块工厂。磁盘扫描、包解析等
//! 具体发现机制由外部实现；核心只消费这一接口。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::module::api::ModuleFactory;
use crate::utils::{ModuleError, Result};

/// 模块变更通知的通道容量
const WATCH_CHANNEL_CAPACITY: usize = 16;

/// 模块源接口
///
/// 提供模块的发现与加载能力。`watch` 是可选能力，
/// 仅在启用热重载时使用。
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// 发现所有可用模块的名称
    async fn discover(&self) -> Result<Vec<String>>;

    /// 获取指定模块的工厂
    ///
    /// # Errors
    ///
    /// 模块不存在时返回 `ModuleNotFound`。
    async fn load(&self, name: &str) -> Result<ModuleFactory>;

    /// 订阅模块变更通知
    ///
    /// 返回变更模块名的接收端；不支持监听的源返回 `None`（默认）。
    async fn watch(&self) -> Option<mpsc::Receiver<String>> {
        None
    }
}

/// 内存模块源
///
/// 以编程方式注册模块工厂的模块源，用于内置模块和测试场景。
/// 支持变更通知，可以配合热重载使用。
pub struct StaticModuleSource {
    /// 已注册的工厂：模块名 -> 工厂
    factories: RwLock<HashMap<String, ModuleFactory>>,

    /// 变更通知发送端（watch 被调用后填充）
    watch_tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl StaticModuleSource {
    /// 创建空的内存模块源
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            watch_tx: Mutex::new(None),
        }
    }

    /// 注册模块工厂
    ///
    /// 同名注册会覆盖旧工厂（配合变更通知实现模块更新）。
    pub async fn register(&self, name: impl Into<String>, factory: ModuleFactory) {
        let mut factories = self.factories.write().await;
        factories.insert(name.into(), factory);
    }

    /// 移除已注册的模块工厂
    pub async fn unregister(&self, name: &str) -> bool {
        let mut factories = self.factories.write().await;
        factories.remove(name).is_some()
    }

    /// 发出模块变更通知
    ///
    /// 如果没有活跃的监听者则静默忽略。
    pub async fn notify_changed(&self, name: impl Into<String>) {
        let tx = self.watch_tx.lock().await;
        if let Some(ref sender) = *tx {
            let _ = sender.send(name.into()).await;
        }
    }
}

impl Default for StaticModuleSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleSource for StaticModuleSource {
    async fn discover(&self) -> Result<Vec<String>> {
        let factories = self.factories.read().await;
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn load(&self, name: &str) -> Result<ModuleFactory> {
        let factories = self.factories.read().await;
        factories
            .get(name)
            .cloned()
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    async fn watch(&self) -> Option<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut watch_tx = self.watch_tx.lock().await;
        *watch_tx = Some(tx);
        Some(rx)
    }
}
