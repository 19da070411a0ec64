//! 模块系统错误类型定义
//!
//! 本模块定义了模块生命周期管理中使用的所有错误类型。

use thiserror::Error;

use crate::module::ModuleState;

/// 模块系统核心错误类型
#[derive(Error, Debug)]
pub enum ModuleError {
    // ==================== 模块查找与注册错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块已注册
    #[error("模块已注册: '{0}'")]
    DuplicateModule(String),

    /// 模块加载失败（工厂函数失败或元数据无效）
    #[error("模块加载失败: '{name}' - {reason}")]
    ModuleLoadFailed {
        /// 模块名称
        name: String,
        /// 失败原因
        reason: String,
    },

    // ==================== 配置错误 ====================

    /// 模块配置无效（validate_config 返回 false 或与配置模式不匹配）
    #[error("模块配置无效: '{name}' - {reason}")]
    ModuleConfigError {
        /// 模块名称
        name: String,
        /// 失败原因
        reason: String,
    },

    // ==================== 状态与依赖错误 ====================

    /// 非法状态转换
    #[error("非法状态转换: 模块 '{name}' 不允许从 {from:?} 转换到 {to:?}")]
    IllegalTransition {
        /// 模块名称
        name: String,
        /// 当前状态
        from: ModuleState,
        /// 目标状态
        to: ModuleState,
    },

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    /// 依赖未启动
    #[error("依赖未启动: 模块 '{name}' 的依赖 '{dependency}' 尚未启动")]
    DependencyNotStarted {
        /// 模块名称
        name: String,
        /// 未启动的依赖名称
        dependency: String,
    },

    /// 模块仍被运行中的依赖者使用
    #[error("模块 '{name}' 被以下运行中的模块依赖: {dependents:?}")]
    DependentStillRunning {
        /// 模块名称
        name: String,
        /// 运行中的依赖者列表
        dependents: Vec<String>,
    },

    // ==================== 钩子执行错误 ====================

    /// 生命周期钩子执行失败
    #[error("钩子执行失败: 模块 '{name}' 的 {hook} 钩子 - {reason}")]
    HookFailure {
        /// 模块名称
        name: String,
        /// 钩子名称
        hook: String,
        /// 失败原因
        reason: String,
    },

    /// 钩子执行超时
    #[error("钩子执行超时: 模块 '{name}' 的 {hook} 钩子")]
    Timeout {
        /// 模块名称
        name: String,
        /// 钩子名称
        hook: String,
    },

    // ==================== 热重载错误 ====================

    /// 热重载未启用
    #[error("热重载未启用")]
    HotReloadDisabled,

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 模块系统操作结果类型别名
pub type Result<T> = std::result::Result<T, ModuleError>;

impl ModuleError {
    /// 获取错误类别标识
    ///
    /// 用于事件负载和日志中的结构化错误分类。
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleError::ModuleNotFound(_) => "module_not_found",
            ModuleError::DuplicateModule(_) => "duplicate_module",
            ModuleError::ModuleLoadFailed { .. } => "module_load_error",
            ModuleError::ModuleConfigError { .. } => "module_config_error",
            ModuleError::IllegalTransition { .. } => "illegal_transition",
            ModuleError::CircularDependency(_) => "cyclic_dependency",
            ModuleError::DependencyNotStarted { .. } => "dependency_not_started",
            ModuleError::DependentStillRunning { .. } => "dependent_still_running",
            ModuleError::HookFailure { .. } => "hook_failure",
            ModuleError::Timeout { .. } => "timeout",
            ModuleError::HotReloadDisabled => "hot_reload_disabled",
            ModuleError::Io(_) => "io",
            ModuleError::Json(_) => "json",
            ModuleError::Yaml(_) => "yaml",
            ModuleError::Internal(_) => "internal",
            ModuleError::Other(_) => "other",
        }
    }

    /// 错误关联的模块名称（如果有）
    pub fn module_name(&self) -> Option<&str> {
        match self {
            ModuleError::ModuleNotFound(name) | ModuleError::DuplicateModule(name) => Some(name),
            ModuleError::ModuleLoadFailed { name, .. }
            | ModuleError::ModuleConfigError { name, .. }
            | ModuleError::IllegalTransition { name, .. }
            | ModuleError::DependencyNotStarted { name, .. }
            | ModuleError::DependentStillRunning { name, .. }
            | ModuleError::HookFailure { name, .. }
            | ModuleError::Timeout { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModuleError::ModuleNotFound("cache".to_string());
        assert!(err.to_string().contains("cache"));

        let err = ModuleError::DependencyNotStarted {
            name: "api".to_string(),
            dependency: "database".to_string(),
        };
        assert!(err.to_string().contains("api"));
        assert!(err.to_string().contains("database"));
    }

    #[test]
    fn test_error_kind() {
        let err = ModuleError::CircularDependency("a -> b -> a".to_string());
        assert_eq!(err.kind(), "cyclic_dependency");

        let err = ModuleError::HookFailure {
            name: "cache".to_string(),
            hook: "start".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(err.kind(), "hook_failure");
    }

    #[test]
    fn test_error_module_name() {
        let err = ModuleError::DuplicateModule("db".to_string());
        assert_eq!(err.module_name(), Some("db"));

        let err = ModuleError::Internal("oops".to_string());
        assert_eq!(err.module_name(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ModuleError = io_err.into();
        assert!(matches!(err, ModuleError::Io(_)));
    }
}
