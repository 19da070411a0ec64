//! 模块状态机
//!
//! 定义模块的生命周期状态与合法的状态转换规则。
//!
//! 生命周期：
//!
//! ```text
//! NOT_INSTALLED --load-->      LOADED
//! LOADED        --install-->   INSTALLED
//! INSTALLED     --start-->     STARTED
//! STARTED       --stop-->      STOPPED
//! STOPPED       --start-->     STARTED
//! STOPPED       --uninstall--> LOADED
//! INSTALLED     --uninstall--> LOADED
//! LOADED        --unload-->    NOT_INSTALLED
//! 任意状态      --失败-->      ERROR
//! ERROR         --reset-->     最近稳定状态或 LOADED
//! ```

use serde::{Deserialize, Serialize};

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 未安装（条目已创建但实例尚未附加）
    NotInstalled,
    /// 已加载（实例已创建）
    Loaded,
    /// 已安装
    Installed,
    /// 已启动，正在运行
    Started,
    /// 已停止
    Stopped,
    /// 错误状态
    Error,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::NotInstalled
    }
}

impl ModuleState {
    /// 检查到目标状态的转换是否合法
    ///
    /// 进入 [`ModuleState::Error`] 的失败转换从任意状态都允许；
    /// 从 `Error` 恢复不经过此表，见 [`ModuleState::reset_target`]。
    pub fn can_transition_to(self, to: ModuleState) -> bool {
        use ModuleState::*;

        if to == Error {
            return true;
        }

        matches!(
            (self, to),
            (NotInstalled, Loaded)
                | (Loaded, Installed)
                | (Installed, Started)
                | (Started, Stopped)
                | (Stopped, Started)
                | (Stopped, Loaded)
                | (Installed, Loaded)
                | (Loaded, NotInstalled)
        )
    }

    /// 计算从 ERROR 状态复位的目标状态
    ///
    /// 恢复到最近一次稳定状态；没有记录时回退到 `Loaded`。
    pub fn reset_target(last_stable: Option<ModuleState>) -> ModuleState {
        last_stable.unwrap_or(ModuleState::Loaded)
    }

    /// 是否可以安装
    pub fn can_install(self) -> bool {
        self == ModuleState::Loaded
    }

    /// 是否可以启动
    pub fn can_start(self) -> bool {
        matches!(self, ModuleState::Installed | ModuleState::Stopped)
    }

    /// 是否可以停止
    pub fn can_stop(self) -> bool {
        self == ModuleState::Started
    }

    /// 是否可以卸载（回到已加载）
    pub fn can_uninstall(self) -> bool {
        matches!(self, ModuleState::Installed | ModuleState::Stopped)
    }

    /// 是否可以移除
    pub fn can_unload(self) -> bool {
        self == ModuleState::Loaded
    }

    /// 是否正在运行
    pub fn is_started(self) -> bool {
        self == ModuleState::Started
    }

    /// 是否为已安装及之后的状态（含已启动/已停止）
    pub fn is_installed(self) -> bool {
        matches!(
            self,
            ModuleState::Installed | ModuleState::Started | ModuleState::Stopped
        )
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ModuleState::NotInstalled => "not_installed",
            ModuleState::Loaded => "loaded",
            ModuleState::Installed => "installed",
            ModuleState::Started => "started",
            ModuleState::Stopped => "stopped",
            ModuleState::Error => "error",
        };
        write!(f, "{}", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ModuleState::*;

    #[test]
    fn test_legal_transitions() {
        assert!(NotInstalled.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(Installed));
        assert!(Installed.can_transition_to(Started));
        assert!(Started.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Started));
        assert!(Stopped.can_transition_to(Loaded));
        assert!(Installed.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(NotInstalled));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!NotInstalled.can_transition_to(Installed));
        assert!(!NotInstalled.can_transition_to(Started));
        assert!(!Loaded.can_transition_to(Started));
        assert!(!Installed.can_transition_to(Stopped));
        assert!(!Started.can_transition_to(Loaded));
        assert!(!Started.can_transition_to(Installed));
        assert!(!Stopped.can_transition_to(Installed));
        assert!(!Loaded.can_transition_to(Stopped));
    }

    #[test]
    fn test_any_state_can_fail() {
        for state in [NotInstalled, Loaded, Installed, Started, Stopped, Error] {
            assert!(state.can_transition_to(Error));
        }
    }

    #[test]
    fn test_error_has_no_table_transitions() {
        assert!(!Error.can_transition_to(Loaded));
        assert!(!Error.can_transition_to(Started));
        assert!(!Error.can_transition_to(NotInstalled));
    }

    #[test]
    fn test_reset_target() {
        assert_eq!(ModuleState::reset_target(Some(Stopped)), Stopped);
        assert_eq!(ModuleState::reset_target(Some(Installed)), Installed);
        assert_eq!(ModuleState::reset_target(None), Loaded);
    }

    #[test]
    fn test_state_predicates() {
        assert!(Loaded.can_install());
        assert!(!Started.can_install());

        assert!(Installed.can_start());
        assert!(Stopped.can_start());
        assert!(!Loaded.can_start());

        assert!(Started.can_stop());
        assert!(!Stopped.can_stop());

        assert!(Installed.can_uninstall());
        assert!(Stopped.can_uninstall());
        assert!(!Started.can_uninstall());

        assert!(Loaded.can_unload());
        assert!(!Installed.can_unload());

        assert!(Started.is_started());
        assert!(Started.is_installed());
        assert!(Stopped.is_installed());
        assert!(!Loaded.is_installed());
    }

    #[test]
    fn test_state_serialization() {
        let text = serde_json::to_string(&ModuleState::NotInstalled).unwrap();
        assert_eq!(text, "\"not_installed\"");

        let state: ModuleState = serde_json::from_str("\"started\"").unwrap();
        assert_eq!(state, ModuleState::Started);
    }
}
