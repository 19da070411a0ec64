//! 模块管理器
//!
//! 模块生命周期管理的统一门面，负责：
//!
//! - 模块发现、加载与移除
//! - 安装 / 启动 / 停止 / 卸载的生命周期编排
//! - 依赖解析与循环检测
//! - 热重载支持
//! - 生命周期事件发布
//!
//! 管理器本身是一个普通的值：内部状态全部通过 `Arc` 共享，
//! 可以廉价克隆，也可以在同一进程中共存多个互不相干的管理器。

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::dependency::{DependencyGraph, DependencyResolver};
use crate::events::{module_events, Event, EventBus};
use crate::module::api::SharedModule;
use crate::module::metadata::ConfigMap;
use crate::module::registry::{ModuleRegistry, ModuleSnapshot};
use crate::module::source::ModuleSource;
use crate::module::state::ModuleState;
use crate::utils::{ModuleError, Result};

/// 并发启动的失败处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartFailurePolicy {
    /// 快速失败（默认）：完成当前层级后终止，返回首个错误
    #[default]
    FailFast,
    /// 宽松失败：继续启动所有层级，失败只通过事件与日志上报
    FailSoft,
}

/// 模块管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// 模块目录列表（原样转交给外部模块源，核心不解释其内容）
    #[serde(default)]
    pub module_dirs: Vec<PathBuf>,

    /// 排除的模块名集合（不区分大小写，永不加载）
    #[serde(default = "default_exclude_modules")]
    pub exclude_modules: HashSet<String>,

    /// 是否启用热重载
    #[serde(default = "default_true")]
    pub enable_hot_reload: bool,

    /// 单个生命周期钩子的超时（毫秒，None 表示不限制）
    #[serde(default)]
    pub hook_timeout_ms: Option<u64>,
}

fn default_exclude_modules() -> HashSet<String> {
    // common 目录约定存放通用基类集合，并非真正的模块
    ["common".to_string()].into_iter().collect()
}

fn default_true() -> bool {
    true
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            module_dirs: vec![],
            exclude_modules: default_exclude_modules(),
            enable_hot_reload: default_true(),
            hook_timeout_ms: None,
        }
    }
}

impl ManagerConfig {
    /// 钩子超时时长
    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_ms.map(Duration::from_millis)
    }

    /// 从配置文件加载（按扩展名识别 JSON，其余按 YAML 解析）
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;

        let config = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        Ok(config)
    }
}

/// 模块管理器
///
/// 所有生命周期操作的入口。对同一模块的钩子调用与状态转换
/// 由模块级操作锁串行化；不同模块的操作可以并发进行。
#[derive(Clone)]
pub struct ModuleManager {
    /// 配置
    config: ManagerConfig,
    /// 模块源
    source: Arc<dyn ModuleSource>,
    /// 模块注册表
    registry: ModuleRegistry,
    /// 依赖图
    graph: Arc<RwLock<DependencyGraph>>,
    /// 事件总线
    bus: EventBus,
    /// 热重载监听任务
    watch_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ModuleManager {
    /// 创建新的模块管理器
    pub fn new(config: ManagerConfig, source: Arc<dyn ModuleSource>) -> Self {
        Self::with_bus(config, source, EventBus::new())
    }

    /// 使用外部事件总线创建模块管理器
    pub fn with_bus(config: ManagerConfig, source: Arc<dyn ModuleSource>, bus: EventBus) -> Self {
        let registry = ModuleRegistry::new(bus.clone());
        Self {
            config,
            source,
            registry,
            graph: Arc::new(RwLock::new(DependencyGraph::new())),
            bus,
            watch_task: Arc::new(Mutex::new(None)),
        }
    }

    /// 事件总线引用
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// 注册表引用
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 配置引用
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ==================== 发现与加载 ====================

    /// 发现可用模块名称列表
    ///
    /// 结果去重、过滤排除列表并按字典序排列。幂等操作。
    pub async fn discover(&self) -> Result<Vec<String>> {
        let names = self.source.discover().await?;
        let unique: BTreeSet<String> = names
            .into_iter()
            .filter(|n| !self.is_excluded(n))
            .collect();
        Ok(unique.into_iter().collect())
    }

    /// 加载模块
    ///
    /// 从模块源获取工厂、创建实例、校验元数据、执行引导钩子，
    /// 然后注册条目并附加实例，发布 `module.loaded`。
    /// 如果新模块与现有模块构成循环依赖，加载被完整回滚并返回
    /// `CircularDependency`。
    #[instrument(skip(self))]
    pub async fn load_module(&self, name: &str) -> Result<()> {
        if self.is_excluded(name) {
            return Err(ModuleError::ModuleNotFound(name.to_string()));
        }
        if self.registry.has(name).await {
            return Err(ModuleError::DuplicateModule(name.to_string()));
        }

        let factory = self.source.load(name).await?;
        let mut instance = (factory)().map_err(|e| ModuleError::ModuleLoadFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let metadata = instance.metadata();
        if let Err(errors) = metadata.validate() {
            return Err(ModuleError::ModuleLoadFailed {
                name: name.to_string(),
                reason: errors.join("; "),
            });
        }
        if metadata.name != name {
            return Err(ModuleError::ModuleLoadFailed {
                name: name.to_string(),
                reason: format!("元数据名称 '{}' 与请求的名称不一致", metadata.name),
            });
        }

        // 引导钩子在注册之前执行，失败时无需回滚
        if let Err(e) = self
            .run_hook(name, "bootstrap", instance.bootstrap())
            .await
        {
            return Err(ModuleError::ModuleLoadFailed {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        // 试探性加入依赖图；构成循环时在 add_graph_edges 内部回滚
        self.add_graph_edges(name, &metadata.dependencies).await?;

        if let Err(e) = self.registry.add(name, factory).await {
            self.rollback_graph_edges(name, &metadata.dependencies).await;
            return Err(e);
        }
        if let Err(e) = self.registry.attach_instance(name, instance).await {
            self.rollback_graph_edges(name, &metadata.dependencies).await;
            self.registry.discard(name).await;
            return Err(e);
        }

        info!(module = %name, "模块加载完成");
        Ok(())
    }

    /// 加载所有可发现的模块
    ///
    /// 单个模块的失败只记录警告，不影响其余模块。
    ///
    /// # Returns
    ///
    /// 返回本次成功加载的模块名列表。
    pub async fn load_all(&self) -> Result<Vec<String>> {
        let names = self.discover().await?;
        let mut loaded = Vec::new();

        for name in names {
            if self.registry.has(&name).await {
                continue;
            }
            match self.load_module(&name).await {
                Ok(()) => loaded.push(name),
                Err(e) => {
                    warn!(module = %name, error = %e, "加载模块失败");
                }
            }
        }

        Ok(loaded)
    }

    // ==================== 生命周期操作 ====================

    /// 安装模块
    ///
    /// 要求模块处于已加载状态。先做配置模式检查与 `validate_config`
    /// 校验（失败不改变状态），再执行安装钩子。成功后存储配置并转换
    /// 到已安装状态。
    #[instrument(skip(self, config))]
    pub async fn install_module(&self, name: &str, config: Option<ConfigMap>) -> Result<()> {
        let entry = self.registry.entry(name).await?;
        let _op = entry.lock_op().await;

        let state = entry.state().await;
        if !state.can_install() {
            return Err(ModuleError::IllegalTransition {
                name: name.to_string(),
                from: state,
                to: ModuleState::Installed,
            });
        }

        // 配置校验失败不改变状态
        if let Some(metadata) = entry.metadata().await {
            if let (Some(schema), Some(cfg)) = (metadata.config_schema.as_ref(), config.as_ref()) {
                let violations = schema.check(cfg);
                if !violations.is_empty() {
                    return Err(ModuleError::ModuleConfigError {
                        name: name.to_string(),
                        reason: violations.join("; "),
                    });
                }
            }
        }

        let module = self.instance_of(&entry, name).await?;
        {
            let mut guard = module.lock().await;

            if !guard.validate_config(config.as_ref()) {
                return Err(ModuleError::ModuleConfigError {
                    name: name.to_string(),
                    reason: "validate_config 拒绝了配置".to_string(),
                });
            }

            if let Err(e) = self
                .run_hook(name, "install", guard.install(config.as_ref()))
                .await
            {
                drop(guard);
                self.registry.record_error(name, &e).await?;
                return Err(e);
            }
        }

        self.registry.set_config(name, config).await?;
        self.registry.set_state(name, ModuleState::Installed).await?;

        info!(module = %name, "模块安装成功");
        Ok(())
    }

    /// 启动模块
    ///
    /// 要求模块处于已安装或已停止状态，且所有必需依赖已启动。
    /// 管理器不会自动启动依赖（参见 [`ModuleManager::start_all`]）。
    #[instrument(skip(self))]
    pub async fn start_module(&self, name: &str) -> Result<()> {
        let entry = self.registry.entry(name).await?;
        let _op = entry.lock_op().await;

        let state = entry.state().await;
        if !state.can_start() {
            return Err(ModuleError::IllegalTransition {
                name: name.to_string(),
                from: state,
                to: ModuleState::Started,
            });
        }

        // 必需依赖必须全部处于已启动状态
        if let Some(metadata) = entry.metadata().await {
            for dep in &metadata.dependencies {
                if self.registry.state_of(dep).await != Some(ModuleState::Started) {
                    return Err(ModuleError::DependencyNotStarted {
                        name: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let module = self.instance_of(&entry, name).await?;
        {
            let mut guard = module.lock().await;
            if let Err(e) = self.run_hook(name, "start", guard.start()).await {
                drop(guard);
                self.registry.record_error(name, &e).await?;
                return Err(e);
            }
        }

        self.registry.set_state(name, ModuleState::Started).await?;

        info!(module = %name, "模块启动成功");
        Ok(())
    }

    /// 停止模块
    ///
    /// 要求模块处于已启动状态。存在运行中的依赖者时：
    ///
    /// - `cascade = false`：以 `DependentStillRunning` 失败；
    /// - `cascade = true`：按逆拓扑顺序先停止所有运行中的传递依赖者。
    #[instrument(skip(self))]
    pub async fn stop_module(&self, name: &str, cascade: bool) -> Result<()> {
        let entry = self.registry.entry(name).await?;

        let state = entry.state().await;
        if !state.can_stop() {
            return Err(ModuleError::IllegalTransition {
                name: name.to_string(),
                from: state,
                to: ModuleState::Stopped,
            });
        }

        let running = self.started_dependents_of(name).await;
        if !running.is_empty() {
            if !cascade {
                return Err(ModuleError::DependentStillRunning {
                    name: name.to_string(),
                    dependents: running.into_iter().collect(),
                });
            }

            let order = {
                let graph = self.graph.read().await;
                DependencyResolver::new(&graph).resolve_stop_order(&running)?
            };
            for dependent in order {
                self.stop_single(&dependent).await?;
            }
        }

        self.stop_single(name).await
    }

    /// 卸载模块（回到已加载状态）
    ///
    /// 要求模块处于已安装或已停止状态，且没有运行中的依赖者。
    /// 成功后配置清空，发布 `module.uninstalled`。
    #[instrument(skip(self))]
    pub async fn uninstall_module(&self, name: &str) -> Result<()> {
        let entry = self.registry.entry(name).await?;
        let _op = entry.lock_op().await;

        let state = entry.state().await;
        if !state.can_uninstall() {
            return Err(ModuleError::IllegalTransition {
                name: name.to_string(),
                from: state,
                to: ModuleState::Loaded,
            });
        }

        let running = self.started_dependents_of(name).await;
        if !running.is_empty() {
            return Err(ModuleError::DependentStillRunning {
                name: name.to_string(),
                dependents: running.into_iter().collect(),
            });
        }

        let module = self.instance_of(&entry, name).await?;
        {
            let mut guard = module.lock().await;
            if let Err(e) = self.run_hook(name, "uninstall", guard.uninstall()).await {
                drop(guard);
                self.registry.record_error(name, &e).await?;
                return Err(e);
            }
        }

        self.registry.set_config(name, None).await?;
        self.registry.set_state(name, ModuleState::Loaded).await?;

        info!(module = %name, "模块卸载成功");
        Ok(())
    }

    /// 移除模块
    ///
    /// 要求模块处于已加载状态。条目与依赖图中的节点一并移除，
    /// 发布 `module.unloaded`。
    #[instrument(skip(self))]
    pub async fn unload_module(&self, name: &str) -> Result<()> {
        let entry = self.registry.entry(name).await?;
        let _op = entry.lock_op().await;

        let state = entry.state().await;
        if !state.can_unload() {
            return Err(ModuleError::IllegalTransition {
                name: name.to_string(),
                from: state,
                to: ModuleState::NotInstalled,
            });
        }

        {
            let mut graph = self.graph.write().await;
            graph.remove_node(name);
        }
        self.registry.remove(name).await?;

        info!(module = %name, "模块已移除");
        Ok(())
    }

    /// 从错误状态复位模块
    ///
    /// 恢复到进入错误前的稳定状态（没有记录时回退到已加载）。
    pub async fn reset_module(&self, name: &str) -> Result<ModuleState> {
        let entry = self.registry.entry(name).await?;
        let _op = entry.lock_op().await;
        self.registry.reset(name).await
    }

    // ==================== 批量操作 ====================

    /// 启动所有已加载或已安装的模块
    ///
    /// 按依赖顺序逐个处理：仍处于已加载状态的条目先以空配置安装
    /// （`validate_config` 拒绝空配置的模块被跳过并各自以配置错误
    /// 失败），然后依序启动。任何启动失败会终止剩余启动，
    /// 已启动的模块保持运行。
    pub async fn start_all(&self) -> Result<()> {
        let subset = self.startable_subset().await;
        if subset.is_empty() {
            return Ok(());
        }

        let order = {
            let graph = self.graph.read().await;
            DependencyResolver::new(&graph).resolve_start_order(&subset)?
        };

        for name in order {
            if self.registry.state_of(&name).await == Some(ModuleState::Loaded) {
                match self.install_module(&name, None).await {
                    Ok(()) => {}
                    Err(ModuleError::ModuleConfigError { .. }) => {
                        warn!(module = %name, "空配置未通过校验，跳过该模块");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            self.start_module(&name).await?;
        }

        Ok(())
    }

    /// 并发启动所有已加载或已安装的模块
    ///
    /// 安装阶段与 [`ModuleManager::start_all`] 相同；启动阶段按拓扑
    /// 层级推进，同一层级内的模块并发启动，层级之间仍然同步。
    ///
    /// # Arguments
    ///
    /// * `policy` - 失败处理策略，默认 [`StartFailurePolicy::FailFast`]
    pub async fn start_all_concurrent(&self, policy: StartFailurePolicy) -> Result<()> {
        let subset = self.startable_subset().await;
        if subset.is_empty() {
            return Ok(());
        }

        let levels = {
            let graph = self.graph.read().await;
            topological_levels(&graph, &subset)?
        };

        // 安装阶段串行执行，跳过语义与 start_all 一致
        let mut skipped: HashSet<String> = HashSet::new();
        for name in levels.iter().flatten() {
            if self.registry.state_of(name).await != Some(ModuleState::Loaded) {
                continue;
            }
            match self.install_module(name, None).await {
                Ok(()) => {}
                Err(ModuleError::ModuleConfigError { .. }) => {
                    warn!(module = %name, "空配置未通过校验，跳过该模块");
                    skipped.insert(name.clone());
                }
                Err(e) => match policy {
                    StartFailurePolicy::FailFast => return Err(e),
                    StartFailurePolicy::FailSoft => {
                        warn!(module = %name, error = %e, "安装失败，跳过该模块");
                        skipped.insert(name.clone());
                    }
                },
            }
        }

        let mut first_error: Option<ModuleError> = None;
        for level in levels {
            let runnable: Vec<String> = level
                .into_iter()
                .filter(|n| !skipped.contains(n))
                .collect();

            let mut handles = Vec::with_capacity(runnable.len());
            for name in runnable {
                let manager = self.clone();
                handles.push(tokio::spawn(async move {
                    let result = manager.start_module(&name).await;
                    (name, result)
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok((_, Ok(()))) => {}
                    Ok((name, Err(e))) => {
                        warn!(module = %name, error = %e, "并发启动失败");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(ModuleError::Internal(format!(
                                "启动任务执行失败: {}",
                                e
                            )));
                        }
                    }
                }
            }

            if policy == StartFailurePolicy::FailFast {
                if let Some(e) = first_error.take() {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// 停止所有运行中的模块
    ///
    /// 按启动顺序的逆序逐个停止。单个模块的失败以事件和日志上报，
    /// 不会中断整个清扫过程。
    pub async fn stop_all(&self) -> Result<()> {
        let subset: BTreeSet<String> = self
            .registry
            .names_by_state(ModuleState::Started)
            .await
            .into_iter()
            .collect();
        if subset.is_empty() {
            return Ok(());
        }

        let order = {
            let graph = self.graph.read().await;
            DependencyResolver::new(&graph).resolve_stop_order(&subset)?
        };

        for name in order {
            if let Err(e) = self.stop_module(&name, false).await {
                warn!(module = %name, error = %e, "停止模块失败，继续停止其余模块");
            }
        }

        Ok(())
    }

    // ==================== 热重载 ====================

    /// 重载模块
    ///
    /// 运行中的模块先级联停止依赖者再停止自身并卸载；已安装或已停止
    /// 的模块直接卸载。然后通过工厂创建全新实例、重建依赖边、以此前
    /// 存储的配置重新安装并启动，最后按依赖顺序恢复重载前正在运行的
    /// 依赖者。成功后发布 `module.reloaded`。
    #[instrument(skip(self))]
    pub async fn reload_module(&self, name: &str) -> Result<()> {
        let entry = self.registry.entry(name).await?;
        let prev_state = entry.state().await;
        let prev_config = entry.config().await;
        let old_dependencies = entry
            .metadata()
            .await
            .map(|m| m.dependencies)
            .unwrap_or_default();

        // 记录重载前正在运行的依赖者，结束时按依赖顺序恢复
        let mut running_dependents = BTreeSet::new();

        match prev_state {
            ModuleState::Started => {
                running_dependents = self.started_dependents_of(name).await;
                self.stop_module(name, true).await?;
                self.uninstall_module(name).await?;
            }
            ModuleState::Installed | ModuleState::Stopped => {
                self.uninstall_module(name).await?;
            }
            ModuleState::Loaded => {}
            other => {
                return Err(ModuleError::IllegalTransition {
                    name: name.to_string(),
                    from: other,
                    to: ModuleState::Loaded,
                });
            }
        }

        // 通过工厂创建全新实例
        let factory = entry.factory();
        let mut instance = (factory)().map_err(|e| ModuleError::ModuleLoadFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let metadata = instance.metadata();
        if let Err(errors) = metadata.validate() {
            let err = ModuleError::ModuleLoadFailed {
                name: name.to_string(),
                reason: errors.join("; "),
            };
            self.registry.record_error(name, &err).await?;
            return Err(err);
        }
        if metadata.name != name {
            let err = ModuleError::ModuleLoadFailed {
                name: name.to_string(),
                reason: format!("元数据名称 '{}' 与请求的名称不一致", metadata.name),
            };
            self.registry.record_error(name, &err).await?;
            return Err(err);
        }

        if let Err(e) = self
            .run_hook(name, "bootstrap", instance.bootstrap())
            .await
        {
            self.registry.record_error(name, &e).await?;
            return Err(e);
        }

        // 依赖可能变化：撤下旧边、加入新边并重新检查循环
        {
            let mut graph = self.graph.write().await;
            for dep in &old_dependencies {
                graph.remove_edge(name, dep);
            }
        }
        if let Err(e) = self.add_graph_edges(name, &metadata.dependencies).await {
            let mut graph = self.graph.write().await;
            for dep in &old_dependencies {
                graph.add_edge(name, dep);
            }
            drop(graph);
            self.registry.record_error(name, &e).await?;
            return Err(e);
        }

        self.registry.replace_instance(name, instance).await?;

        // 以此前存储的配置重新安装并启动
        if prev_state.is_installed() {
            self.install_module(name, prev_config).await?;
            self.start_module(name).await?;
        }

        // 恢复重载前正在运行的依赖者
        if !running_dependents.is_empty() {
            let order = {
                let graph = self.graph.read().await;
                DependencyResolver::new(&graph).resolve_start_order(&running_dependents)?
            };
            for dependent in order {
                self.start_module(&dependent).await?;
            }
        }

        self.bus
            .publish(Event::new(
                module_events::MODULE_RELOADED,
                name,
                serde_json::json!({}),
            ))
            .await;

        info!(module = %name, "模块重载完成");
        Ok(())
    }

    /// 触发模块重载
    ///
    /// # Errors
    ///
    /// 热重载未启用时返回 `HotReloadDisabled`。
    pub async fn trigger_reload(&self, name: &str) -> Result<()> {
        if !self.config.enable_hot_reload {
            return Err(ModuleError::HotReloadDisabled);
        }
        self.reload_module(name).await
    }

    /// 启动热重载监听
    ///
    /// 订阅模块源的变更通知流，对每个变更的模块触发重载。
    ///
    /// # Errors
    ///
    /// 热重载未启用时返回 `HotReloadDisabled`；
    /// 模块源不支持变更监听时返回内部错误。
    pub async fn start_hot_reload(&self) -> Result<()> {
        if !self.config.enable_hot_reload {
            return Err(ModuleError::HotReloadDisabled);
        }

        let mut rx = self
            .source
            .watch()
            .await
            .ok_or_else(|| ModuleError::Internal("模块源不支持变更监听".to_string()))?;

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(name) = rx.recv().await {
                debug!(module = %name, "收到模块变更通知");
                if let Err(e) = manager.reload_module(&name).await {
                    warn!(module = %name, error = %e, "热重载失败");
                }
            }
        });

        let mut task = self.watch_task.lock().await;
        if let Some(old) = task.replace(handle) {
            old.abort();
        }

        info!("热重载监听已启动");
        Ok(())
    }

    /// 停止热重载监听
    pub async fn stop_hot_reload(&self) {
        let mut task = self.watch_task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            info!("热重载监听已停止");
        }
    }

    // ==================== 查询 ====================

    /// 获取模块实例句柄（依赖注入用）
    ///
    /// # Errors
    ///
    /// 模块不存在或实例尚未附加时返回 `ModuleNotFound`。
    pub async fn get_module(&self, name: &str) -> Result<SharedModule> {
        let entry = self.registry.entry(name).await?;
        entry
            .instance()
            .await
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    /// 所有已加载模块的名称（字典序）
    pub async fn list_modules(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// 所有模块的状态映射
    pub async fn module_states(&self) -> std::collections::HashMap<String, ModuleState> {
        self.registry.states().await
    }

    /// 按状态筛选模块名称
    pub async fn modules_by_state(&self, state: ModuleState) -> Vec<String> {
        self.registry.names_by_state(state).await
    }

    /// 检查模块是否已加载
    pub async fn is_loaded(&self, name: &str) -> bool {
        self.registry.has(name).await
    }

    /// 获取模块状态
    pub async fn state_of(&self, name: &str) -> Option<ModuleState> {
        self.registry.state_of(name).await
    }

    /// 获取模块条目快照
    pub async fn snapshot(&self, name: &str) -> Option<ModuleSnapshot> {
        match self.registry.get(name).await {
            Some(entry) => Some(entry.snapshot().await),
            None => None,
        }
    }

    /// 已知模块数量
    pub async fn module_count(&self) -> usize {
        self.registry.count().await
    }

    /// 模块的直接依赖集合
    pub async fn dependencies_of(&self, name: &str) -> BTreeSet<String> {
        let graph = self.graph.read().await;
        graph.dependencies_of(name)
    }

    /// 直接依赖该模块的模块集合
    pub async fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let graph = self.graph.read().await;
        graph.dependents_of(name)
    }

    // ==================== 内部方法 ====================

    /// 检查名称是否在排除列表中（不区分大小写）
    fn is_excluded(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.config
            .exclude_modules
            .iter()
            .any(|excluded| excluded.to_lowercase() == lower)
    }

    /// 获取条目的实例句柄
    async fn instance_of(
        &self,
        entry: &crate::module::registry::RegistryEntry,
        name: &str,
    ) -> Result<SharedModule> {
        entry
            .instance()
            .await
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    /// 运行生命周期钩子，应用可选的超时并归一化错误
    async fn run_hook<F>(&self, name: &str, hook: &str, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let outcome = match self.config.hook_timeout() {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ModuleError::Timeout {
                        name: name.to_string(),
                        hook: hook.to_string(),
                    });
                }
            },
            None => fut.await,
        };

        outcome.map_err(|e| ModuleError::HookFailure {
            name: name.to_string(),
            hook: hook.to_string(),
            reason: e.to_string(),
        })
    }

    /// 停止单个模块（级联内部使用，状态已变化时静默跳过）
    async fn stop_single(&self, name: &str) -> Result<()> {
        let entry = self.registry.entry(name).await?;
        let _op = entry.lock_op().await;

        if entry.state().await != ModuleState::Started {
            debug!(module = %name, "模块已不在运行状态，跳过停止");
            return Ok(());
        }

        let module = self.instance_of(&entry, name).await?;
        {
            let mut guard = module.lock().await;
            if let Err(e) = self.run_hook(name, "stop", guard.stop()).await {
                drop(guard);
                self.registry.record_error(name, &e).await?;
                return Err(e);
            }
        }

        self.registry.set_state(name, ModuleState::Stopped).await?;

        info!(module = %name, "模块停止成功");
        Ok(())
    }

    /// 运行中的传递依赖者集合
    async fn started_dependents_of(&self, name: &str) -> BTreeSet<String> {
        let dependents = {
            let graph = self.graph.read().await;
            graph.transitive_dependents_of(name)
        };

        let mut running = BTreeSet::new();
        for dependent in dependents {
            if self.registry.state_of(&dependent).await == Some(ModuleState::Started) {
                running.insert(dependent);
            }
        }
        running
    }

    /// 可参与 start_all 的模块子集（已加载或已安装）
    async fn startable_subset(&self) -> BTreeSet<String> {
        self.registry
            .states()
            .await
            .into_iter()
            .filter(|(_, state)| {
                matches!(state, ModuleState::Loaded | ModuleState::Installed)
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// 将模块的依赖边加入图中并检查循环
    ///
    /// 构成循环时撤销本次全部改动并返回 `CircularDependency`。
    async fn add_graph_edges(&self, name: &str, dependencies: &[String]) -> Result<()> {
        let mut graph = self.graph.write().await;

        let mut created: Vec<String> = Vec::new();
        if !graph.contains(name) {
            created.push(name.to_string());
        }
        for dep in dependencies {
            if !graph.contains(dep) {
                created.push(dep.clone());
            }
        }

        graph.add_node(name);
        for dep in dependencies {
            graph.add_edge(name, dep);
        }

        let cycles = graph.detect_cycles();
        if cycles.is_empty() {
            return Ok(());
        }

        for dep in dependencies {
            graph.remove_edge(name, dep);
        }
        for node in &created {
            graph.remove_node(node);
        }

        Err(ModuleError::CircularDependency(cycles[0].join(" -> ")))
    }

    /// 撤销 add_graph_edges 的改动（注册失败时的回滚）
    async fn rollback_graph_edges(&self, name: &str, dependencies: &[String]) {
        let mut graph = self.graph.write().await;
        for dep in dependencies {
            graph.remove_edge(name, dep);
            if graph.dependencies_of(dep).is_empty() && graph.dependents_of(dep).is_empty() {
                graph.remove_node(dep);
            }
        }
        if graph.dependencies_of(name).is_empty() && graph.dependents_of(name).is_empty() {
            graph.remove_node(name);
        }
    }
}

/// 计算子集的拓扑层级
///
/// 每个模块的层级为其子集内依赖的最大层级加一；同一层级内按字典序。
fn topological_levels(
    graph: &DependencyGraph,
    subset: &BTreeSet<String>,
) -> Result<Vec<Vec<String>>> {
    let order = graph.topological_order(Some(subset))?;

    let mut level_of: BTreeMap<String, usize> = BTreeMap::new();
    let mut levels: Vec<Vec<String>> = Vec::new();

    for name in order {
        let level = graph
            .dependencies_of(&name)
            .iter()
            .filter(|d| subset.contains(*d))
            .map(|d| level_of[d] + 1)
            .max()
            .unwrap_or(0);

        level_of.insert(name.clone(), level);
        while levels.len() <= level {
            levels.push(Vec::new());
        }
        levels[level].push(name);
    }

    Ok(levels)
}
