//! 模块注册表
//!
//! 注册表是模块状态的唯一权威来源：持有模块条目（工厂、实例、
//! 元数据、状态、配置与错误记录），所有状态变更都经由注册表完成。
//! 每次成功的状态转换都会通过注入的事件总线发布
//! `module.state_changed` 与对应的类型事件。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace};

use crate::events::{module_events, Event, EventBus};
use crate::module::api::{share_module, Module, ModuleFactory, SharedModule};
use crate::module::metadata::{ConfigMap, ModuleMetadata};
use crate::module::state::ModuleState;
use crate::utils::{ModuleError, Result};

/// 模块条目快照
///
/// 条目在某一时刻的只读视图，用于查询接口。
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSnapshot {
    /// 模块名称
    pub name: String,
    /// 当前状态
    pub state: ModuleState,
    /// 缓存的元数据（附加实例后可用）
    pub metadata: Option<ModuleMetadata>,
    /// 最近一次安装使用的配置
    pub config: Option<ConfigMap>,
    /// 最近一次失败的描述
    pub last_error: Option<String>,
    /// 加载时间
    pub loaded_at: Option<DateTime<Utc>>,
    /// 安装时间
    pub installed_at: Option<DateTime<Utc>>,
    /// 启动时间
    pub started_at: Option<DateTime<Utc>>,
}

/// 条目的可变状态块
#[derive(Debug, Default)]
struct EntryStatus {
    state: ModuleState,
    metadata: Option<ModuleMetadata>,
    config: Option<ConfigMap>,
    last_error: Option<String>,
    last_stable_state: Option<ModuleState>,
    loaded_at: Option<DateTime<Utc>>,
    installed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
}

/// 模块条目
///
/// 每个已知模块对应一个条目。`op_lock` 是模块级操作锁：
/// 生命周期操作在持有期间完成钩子调用与状态转换，
/// 保证同一模块的钩子不会并发执行、转换全序排列。
pub struct RegistryEntry {
    name: String,
    factory: ModuleFactory,
    op_lock: Mutex<()>,
    instance: RwLock<Option<SharedModule>>,
    status: RwLock<EntryStatus>,
}

impl RegistryEntry {
    fn new(name: String, factory: ModuleFactory) -> Self {
        Self {
            name,
            factory,
            op_lock: Mutex::new(()),
            instance: RwLock::new(None),
            status: RwLock::new(EntryStatus::default()),
        }
    }

    /// 模块名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取模块工厂
    pub fn factory(&self) -> ModuleFactory {
        Arc::clone(&self.factory)
    }

    /// 获取模块级操作锁
    ///
    /// 调用生命周期钩子前必须持有此锁，并持有到状态转换完成。
    pub async fn lock_op(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    /// 获取实例句柄
    pub async fn instance(&self) -> Option<SharedModule> {
        self.instance.read().await.clone()
    }

    /// 当前状态
    pub async fn state(&self) -> ModuleState {
        self.status.read().await.state
    }

    /// 缓存的元数据
    pub async fn metadata(&self) -> Option<ModuleMetadata> {
        self.status.read().await.metadata.clone()
    }

    /// 最近一次安装使用的配置
    pub async fn config(&self) -> Option<ConfigMap> {
        self.status.read().await.config.clone()
    }

    /// 条目快照
    pub async fn snapshot(&self) -> ModuleSnapshot {
        let status = self.status.read().await;
        ModuleSnapshot {
            name: self.name.clone(),
            state: status.state,
            metadata: status.metadata.clone(),
            config: status.config.clone(),
            last_error: status.last_error.clone(),
            loaded_at: status.loaded_at,
            installed_at: status.installed_at,
            started_at: status.started_at,
        }
    }
}

/// 状态转换对应的类型事件
fn transition_event(from: ModuleState, to: ModuleState) -> Option<&'static str> {
    use ModuleState::*;
    match (from, to) {
        (NotInstalled, Loaded) => Some(module_events::MODULE_LOADED),
        (Loaded, Installed) => Some(module_events::MODULE_INSTALLED),
        (Installed, Started) | (Stopped, Started) => Some(module_events::MODULE_STARTED),
        (Started, Stopped) => Some(module_events::MODULE_STOPPED),
        (Installed, Loaded) | (Stopped, Loaded) => Some(module_events::MODULE_UNINSTALLED),
        (Loaded, NotInstalled) => Some(module_events::MODULE_UNLOADED),
        _ => None,
    }
}

/// 模块注册表
///
/// 使用 `Arc<RwLock>` 共享名称到条目的映射，可以廉价克隆。
/// 映射的写锁只在增删条目时短暂持有，持有期间不会挂起。
#[derive(Clone)]
pub struct ModuleRegistry {
    entries: Arc<RwLock<HashMap<String, Arc<RegistryEntry>>>>,
    bus: EventBus,
}

impl ModuleRegistry {
    /// 创建新的注册表
    ///
    /// # Arguments
    ///
    /// * `bus` - 用于发布状态事件的事件总线
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    /// 事件总线引用
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ==================== 条目管理 ====================

    /// 创建模块条目
    ///
    /// 新条目处于未安装状态，实例尚未附加。
    ///
    /// # Errors
    ///
    /// 名称已存在时返回 `DuplicateModule`。
    pub async fn add(&self, name: &str, factory: ModuleFactory) -> Result<Arc<RegistryEntry>> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(name) {
            return Err(ModuleError::DuplicateModule(name.to_string()));
        }

        let entry = Arc::new(RegistryEntry::new(name.to_string(), factory));
        entries.insert(name.to_string(), Arc::clone(&entry));

        debug!(module = %name, "模块条目已创建");
        Ok(entry)
    }

    /// 获取模块条目
    ///
    /// # Errors
    ///
    /// 模块不存在时返回 `ModuleNotFound`。
    pub async fn entry(&self, name: &str) -> Result<Arc<RegistryEntry>> {
        self.get(name)
            .await
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    /// 获取模块条目（不存在时返回 None）
    pub async fn get(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        let entries = self.entries.read().await;
        entries.get(name).cloned()
    }

    /// 检查模块是否存在
    pub async fn has(&self, name: &str) -> bool {
        let entries = self.entries.read().await;
        entries.contains_key(name)
    }

    /// 移除模块条目
    ///
    /// 只有处于已加载状态的模块可以移除；移除发布 `module.unloaded`。
    ///
    /// # Errors
    ///
    /// 模块不存在时返回 `ModuleNotFound`，状态不允许时返回
    /// `IllegalTransition`。
    pub async fn remove(&self, name: &str) -> Result<()> {
        let entry = self.entry(name).await?;

        {
            let status = entry.status.read().await;
            if !status.state.can_transition_to(ModuleState::NotInstalled) {
                return Err(ModuleError::IllegalTransition {
                    name: name.to_string(),
                    from: status.state,
                    to: ModuleState::NotInstalled,
                });
            }
        }

        {
            let mut entries = self.entries.write().await;
            entries.remove(name);
        }

        debug!(module = %name, "模块条目已移除");
        self.publish_transition(name, ModuleState::Loaded, ModuleState::NotInstalled)
            .await;

        Ok(())
    }

    /// 丢弃模块条目（回滚用）
    ///
    /// 不校验状态也不发布事件，仅用于加载失败时撤销 `add`。
    pub(crate) async fn discard(&self, name: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(name);
    }

    // ==================== 实例与状态 ====================

    /// 附加模块实例
    ///
    /// 完成 `NOT_INSTALLED -> LOADED` 转换：缓存元数据、记录加载时间，
    /// 并发布 `module.loaded`。
    pub async fn attach_instance(&self, name: &str, instance: Box<dyn Module>) -> Result<()> {
        let entry = self.entry(name).await?;
        let metadata = instance.metadata();

        {
            let mut status = entry.status.write().await;
            if status.state != ModuleState::NotInstalled {
                return Err(ModuleError::IllegalTransition {
                    name: name.to_string(),
                    from: status.state,
                    to: ModuleState::Loaded,
                });
            }
            status.state = ModuleState::Loaded;
            status.metadata = Some(metadata);
            status.last_error = None;
            status.loaded_at = Some(Utc::now());
        }

        {
            let mut slot = entry.instance.write().await;
            *slot = Some(share_module(instance));
        }

        self.publish_transition(name, ModuleState::NotInstalled, ModuleState::Loaded)
            .await;

        Ok(())
    }

    /// 替换模块实例（热重载）
    ///
    /// 模块必须处于已加载状态。换入新实例并刷新元数据缓存，
    /// 状态保持不变，不发布转换事件。
    pub async fn replace_instance(&self, name: &str, instance: Box<dyn Module>) -> Result<()> {
        let entry = self.entry(name).await?;
        let metadata = instance.metadata();

        {
            let mut status = entry.status.write().await;
            if status.state != ModuleState::Loaded {
                return Err(ModuleError::IllegalTransition {
                    name: name.to_string(),
                    from: status.state,
                    to: ModuleState::Loaded,
                });
            }
            status.metadata = Some(metadata);
            status.loaded_at = Some(Utc::now());
        }

        {
            let mut slot = entry.instance.write().await;
            *slot = Some(share_module(instance));
        }

        debug!(module = %name, "模块实例已替换");
        Ok(())
    }

    /// 设置模块状态
    ///
    /// 转换合法性由状态机校验；成功后清除错误记录、维护时间戳，
    /// 并发布 `module.state_changed` 与对应的类型事件。
    ///
    /// # Errors
    ///
    /// 转换不合法时返回 `IllegalTransition`。
    pub async fn set_state(&self, name: &str, new_state: ModuleState) -> Result<()> {
        let entry = self.entry(name).await?;

        let from = {
            let mut status = entry.status.write().await;
            let from = status.state;

            if !from.can_transition_to(new_state) {
                return Err(ModuleError::IllegalTransition {
                    name: name.to_string(),
                    from,
                    to: new_state,
                });
            }

            status.state = new_state;
            status.last_error = None;

            match new_state {
                ModuleState::Installed => {
                    status.installed_at = Some(Utc::now());
                }
                ModuleState::Started => {
                    status.started_at = Some(Utc::now());
                }
                ModuleState::Stopped => {
                    status.started_at = None;
                }
                ModuleState::Loaded => {
                    // 卸载回到已加载：安装痕迹一并清除
                    status.installed_at = None;
                    status.started_at = None;
                }
                _ => {}
            }

            from
        };

        trace!(module = %name, from = %from, to = %new_state, "模块状态已更新");
        self.publish_transition(name, from, new_state).await;

        Ok(())
    }

    /// 设置模块配置
    pub async fn set_config(&self, name: &str, config: Option<ConfigMap>) -> Result<()> {
        let entry = self.entry(name).await?;
        let mut status = entry.status.write().await;
        status.config = config;
        Ok(())
    }

    /// 记录模块错误
    ///
    /// 将模块置为错误状态，保留进入错误前的稳定状态以便复位，
    /// 并发布 `module.state_changed` 与 `module.error`。
    pub async fn record_error(&self, name: &str, error: &ModuleError) -> Result<()> {
        let entry = self.entry(name).await?;

        let from = {
            let mut status = entry.status.write().await;
            let from = status.state;
            if from != ModuleState::Error {
                status.last_stable_state = Some(from);
            }
            status.state = ModuleState::Error;
            status.last_error = Some(error.to_string());
            from
        };

        self.bus
            .publish(Event::new(
                module_events::MODULE_STATE_CHANGED,
                name,
                serde_json::json!({ "from": from, "to": ModuleState::Error }),
            ))
            .await;
        self.bus
            .publish(Event::new(
                module_events::MODULE_ERROR,
                name,
                serde_json::json!({
                    "error_kind": error.kind(),
                    "error": error.to_string(),
                }),
            ))
            .await;

        Ok(())
    }

    /// 从错误状态复位
    ///
    /// 恢复到最近一次稳定状态（没有记录时回退到已加载）。
    ///
    /// # Errors
    ///
    /// 模块不处于错误状态时返回 `IllegalTransition`。
    pub async fn reset(&self, name: &str) -> Result<ModuleState> {
        let entry = self.entry(name).await?;

        let (from, target) = {
            let mut status = entry.status.write().await;
            if status.state != ModuleState::Error {
                return Err(ModuleError::IllegalTransition {
                    name: name.to_string(),
                    from: status.state,
                    to: ModuleState::reset_target(status.last_stable_state),
                });
            }

            let target = ModuleState::reset_target(status.last_stable_state);
            let from = status.state;
            status.state = target;
            status.last_error = None;
            status.last_stable_state = None;
            (from, target)
        };

        debug!(module = %name, target = %target, "模块已从错误状态复位");
        self.bus
            .publish(Event::new(
                module_events::MODULE_STATE_CHANGED,
                name,
                serde_json::json!({ "from": from, "to": target }),
            ))
            .await;

        Ok(target)
    }

    // ==================== 查询 ====================

    /// 所有已知模块的名称（字典序）
    pub async fn names(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// 所有条目的快照
    pub async fn list(&self) -> Vec<ModuleSnapshot> {
        let entries: Vec<Arc<RegistryEntry>> = {
            let map = self.entries.read().await;
            map.values().cloned().collect()
        };

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// 所有模块的状态映射
    pub async fn states(&self) -> HashMap<String, ModuleState> {
        let entries: Vec<Arc<RegistryEntry>> = {
            let map = self.entries.read().await;
            map.values().cloned().collect()
        };

        let mut states = HashMap::with_capacity(entries.len());
        for entry in entries {
            states.insert(entry.name.clone(), entry.state().await);
        }
        states
    }

    /// 获取模块状态
    pub async fn state_of(&self, name: &str) -> Option<ModuleState> {
        match self.get(name).await {
            Some(entry) => Some(entry.state().await),
            None => None,
        }
    }

    /// 按状态筛选模块名称（字典序）
    pub async fn names_by_state(&self, target: ModuleState) -> Vec<String> {
        let states = self.states().await;
        let mut names: Vec<String> = states
            .into_iter()
            .filter(|(_, state)| *state == target)
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// 已注册模块数量
    pub async fn count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    // ==================== 内部方法 ====================

    /// 发布状态转换事件
    ///
    /// 先发布 `module.state_changed`，再发布转换对应的类型事件。
    async fn publish_transition(&self, name: &str, from: ModuleState, to: ModuleState) {
        self.bus
            .publish(Event::new(
                module_events::MODULE_STATE_CHANGED,
                name,
                serde_json::json!({ "from": from, "to": to }),
            ))
            .await;

        if let Some(event_type) = transition_event(from, to) {
            self.bus
                .publish(Event::new(event_type, name, serde_json::json!({})))
                .await;
        }
    }
}
