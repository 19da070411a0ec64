//! 事件系统数据结构
//!
//! 定义模块生命周期事件的核心数据结构与预定义事件类型。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 生成事件唯一标识
fn generate_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 事件
///
/// 模块生命周期事件的统一载体。`event_type` 使用点分格式
/// （如 `module.loaded`），`module_name` 为事件关联的模块，
/// 系统级事件可以没有关联模块。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识
    pub event_id: String,

    /// 事件类型（格式: category.name，如 module.loaded）
    pub event_type: String,

    /// 关联的模块名称（系统级事件为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,

    /// 事件负载
    #[serde(default)]
    pub payload: Value,

    /// 事件时间戳
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// 创建关联到指定模块的事件
    pub fn new(
        event_type: impl Into<String>,
        module_name: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: generate_event_id(),
            event_type: event_type.into(),
            module_name: Some(module_name.into()),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// 创建不关联模块的系统级事件
    pub fn system(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: generate_event_id(),
            event_type: event_type.into(),
            module_name: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// 使用 Builder 模式构建事件
    pub fn builder(event_type: impl Into<String>) -> EventBuilder {
        EventBuilder::new(event_type)
    }
}

/// 事件构建器
#[derive(Debug)]
pub struct EventBuilder {
    event_type: String,
    module_name: Option<String>,
    payload: Value,
}

impl EventBuilder {
    /// 创建新的构建器
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            module_name: None,
            payload: Value::Null,
        }
    }

    /// 设置关联模块
    pub fn module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    /// 设置事件负载
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// 构建事件
    pub fn build(self) -> Event {
        Event {
            event_id: generate_event_id(),
            event_type: self.event_type,
            module_name: self.module_name,
            payload: self.payload,
            timestamp: Utc::now(),
        }
    }
}

/// 匹配事件类型模式
///
/// 模式为点分格式，支持 `*` 通配：
///
/// - 整个模式为 `*` 时匹配任意事件类型；
/// - 否则按 `.` 分段逐段匹配，`*` 段恰好匹配一个段；
/// - 段数不同则不匹配（不支持跨段通配）。
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let type_segments: Vec<&str> = event_type.split('.').collect();

    if pattern_segments.len() != type_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(type_segments.iter())
        .all(|(p, t)| *p == "*" || p == t)
}

/// 预定义的模块生命周期事件类型
///
/// 这些字符串是对外契约的一部分，下游订阅者依赖其精确值。
pub mod module_events {
    /// 模块加载完成
    pub const MODULE_LOADED: &str = "module.loaded";
    /// 模块安装完成
    pub const MODULE_INSTALLED: &str = "module.installed";
    /// 模块启动完成
    pub const MODULE_STARTED: &str = "module.started";
    /// 模块停止完成
    pub const MODULE_STOPPED: &str = "module.stopped";
    /// 模块卸载（回到已加载）完成
    pub const MODULE_UNINSTALLED: &str = "module.uninstalled";
    /// 模块移除完成
    pub const MODULE_UNLOADED: &str = "module.unloaded";
    /// 模块状态变更
    pub const MODULE_STATE_CHANGED: &str = "module.state_changed";
    /// 模块热重载完成
    pub const MODULE_RELOADED: &str = "module.reloaded";
    /// 模块错误
    pub const MODULE_ERROR: &str = "module.error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = Event::new("module.loaded", "cache", json!({"version": "1.0.0"}));

        assert!(!event.event_id.is_empty());
        assert_eq!(event.event_type, "module.loaded");
        assert_eq!(event.module_name.as_deref(), Some("cache"));
    }

    #[test]
    fn test_system_event_has_no_module() {
        let event = Event::system("module.error", json!({"error": "boom"}));
        assert!(event.module_name.is_none());
    }

    #[test]
    fn test_event_builder() {
        let event = Event::builder("module.started")
            .module_name("database")
            .payload(json!({"port": 5432}))
            .build();

        assert_eq!(event.event_type, "module.started");
        assert_eq!(event.module_name.as_deref(), Some("database"));
        assert_eq!(event.payload["port"], 5432);
    }

    #[test]
    fn test_pattern_matches_exact() {
        assert!(pattern_matches("module.loaded", "module.loaded"));
        assert!(!pattern_matches("module.loaded", "module.started"));
    }

    #[test]
    fn test_pattern_matches_global_wildcard() {
        assert!(pattern_matches("*", "module.loaded"));
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("*", "a.b.c"));
    }

    #[test]
    fn test_pattern_matches_segment_wildcard() {
        assert!(pattern_matches("module.*", "module.loaded"));
        assert!(pattern_matches("module.*", "module.started"));
        assert!(pattern_matches("*.loaded", "module.loaded"));
        assert!(!pattern_matches("module.*", "config.changed"));
        // 段通配恰好匹配一个段，不跨段
        assert!(!pattern_matches("module.*", "module"));
        assert!(!pattern_matches("module.*", "module.a.b"));
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new("module.loaded", "cache", json!({"key": "value"}));
        let text = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed.event_type, event.event_type);
        assert_eq!(parsed.module_name, event.module_name);
    }
}
