//! 模块元数据定义
//!
//! 定义模块的声明式描述：名称、版本、依赖与配置模式。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模块配置映射类型
///
/// 配置以 JSON 对象的形式在安装时传入模块。
pub type ConfigMap = serde_json::Map<String, Value>;

/// 配置项的期望类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigValueType {
    /// 字符串
    String,
    /// 整数
    Integer,
    /// 浮点数
    Float,
    /// 布尔值
    Boolean,
    /// 数组
    Array,
    /// 对象
    Object,
}

impl ConfigValueType {
    /// 检查 JSON 值是否符合此类型
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ConfigValueType::String => value.is_string(),
            ConfigValueType::Integer => value.is_i64() || value.is_u64(),
            ConfigValueType::Float => value.is_number(),
            ConfigValueType::Boolean => value.is_boolean(),
            ConfigValueType::Array => value.is_array(),
            ConfigValueType::Object => value.is_object(),
        }
    }
}

/// 配置模式
///
/// 配置项名到期望类型的声明式映射。只约束声明过的配置项的类型，
/// 未声明的配置项不受限制。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    /// 配置项名 -> 期望类型
    pub fields: BTreeMap<String, ConfigValueType>,
}

impl ConfigSchema {
    /// 创建空的配置模式
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明一个配置项的期望类型
    pub fn field(mut self, name: impl Into<String>, value_type: ConfigValueType) -> Self {
        self.fields.insert(name.into(), value_type);
        self
    }

    /// 检查配置与模式的匹配情况
    ///
    /// # Returns
    ///
    /// 返回所有类型不匹配的描述；完全匹配时为空。
    pub fn check(&self, config: &ConfigMap) -> Vec<String> {
        let mut violations = Vec::new();

        for (name, expected) in &self.fields {
            if let Some(value) = config.get(name) {
                if !expected.matches(value) {
                    violations.push(format!(
                        "配置项 '{}' 期望类型 {:?}，实际值为 {}",
                        name, expected, value
                    ));
                }
            }
        }

        violations
    }
}

/// 模块元数据
///
/// 模块的声明式描述，附加到实例后不再变化。
/// 依赖以模块名引用，版本号为自由格式标签，核心不做解释。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// 模块名称（唯一，区分大小写，不含空白字符）
    pub name: String,

    /// 模块版本（自由格式标签）
    #[serde(default = "default_version")]
    pub version: String,

    /// 模块描述
    #[serde(default)]
    pub description: String,

    /// 必需依赖的模块名列表
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// 可选依赖的模块名列表（缺失不构成错误）
    #[serde(default)]
    pub optional_dependencies: Vec<String>,

    /// 配置模式定义
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<ConfigSchema>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl ModuleMetadata {
    /// 创建新的模块元数据
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            dependencies: vec![],
            optional_dependencies: vec![],
            config_schema: None,
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 设置必需依赖
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// 设置可选依赖
    pub fn with_optional_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// 设置配置模式
    pub fn with_config_schema(mut self, schema: ConfigSchema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// 验证元数据有效性
    ///
    /// # Returns
    ///
    /// 有效时返回 `Ok(())`，否则返回所有问题的描述列表。
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = vec![];

        if self.name.is_empty() {
            errors.push("模块名称不能为空".to_string());
        } else if self.name.chars().any(char::is_whitespace) {
            errors.push(format!("模块名称不能包含空白字符: '{}'", self.name));
        }

        for dep in self.dependencies.iter().chain(&self.optional_dependencies) {
            if dep.is_empty() {
                errors.push("依赖名称不能为空".to_string());
            } else if dep.chars().any(char::is_whitespace) {
                errors.push(format!("依赖名称不能包含空白字符: '{}'", dep));
            }
        }

        if self.dependencies.contains(&self.name) {
            errors.push(format!("模块 '{}' 不能依赖自身", self.name));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_creation() {
        let metadata = ModuleMetadata::new("cache")
            .with_version("1.2.0")
            .with_description("缓存模块")
            .with_dependencies(["database"]);

        assert_eq!(metadata.name, "cache");
        assert_eq!(metadata.version, "1.2.0");
        assert_eq!(metadata.dependencies, vec!["database"]);
        assert!(metadata.optional_dependencies.is_empty());
    }

    #[test]
    fn test_metadata_validate_ok() {
        let metadata = ModuleMetadata::new("cache").with_dependencies(["database"]);
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_metadata_validate_empty_name() {
        let metadata = ModuleMetadata::new("");
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_metadata_validate_whitespace_name() {
        let metadata = ModuleMetadata::new("my module");
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_metadata_validate_self_dependency() {
        let metadata = ModuleMetadata::new("cache").with_dependencies(["cache"]);
        let errors = metadata.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("依赖自身")));
    }

    #[test]
    fn test_config_value_type_matches() {
        assert!(ConfigValueType::String.matches(&json!("text")));
        assert!(!ConfigValueType::String.matches(&json!(42)));

        assert!(ConfigValueType::Integer.matches(&json!(42)));
        assert!(!ConfigValueType::Integer.matches(&json!(4.2)));
        assert!(!ConfigValueType::Integer.matches(&json!("42")));

        assert!(ConfigValueType::Float.matches(&json!(4.2)));
        assert!(ConfigValueType::Float.matches(&json!(42)));

        assert!(ConfigValueType::Boolean.matches(&json!(true)));
        assert!(ConfigValueType::Array.matches(&json!([1, 2])));
        assert!(ConfigValueType::Object.matches(&json!({"a": 1})));
    }

    #[test]
    fn test_config_schema_check() {
        let schema = ConfigSchema::new()
            .field("port", ConfigValueType::Integer)
            .field("host", ConfigValueType::String);

        let mut config = ConfigMap::new();
        config.insert("port".to_string(), json!(8080));
        config.insert("host".to_string(), json!("localhost"));
        assert!(schema.check(&config).is_empty());

        let mut bad_config = ConfigMap::new();
        bad_config.insert("port".to_string(), json!("eighty"));
        let violations = schema.check(&bad_config);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("port"));
    }

    #[test]
    fn test_config_schema_ignores_undeclared_keys() {
        let schema = ConfigSchema::new().field("port", ConfigValueType::Integer);

        let mut config = ConfigMap::new();
        config.insert("extra".to_string(), json!("anything"));
        assert!(schema.check(&config).is_empty());
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = ModuleMetadata::new("cache")
            .with_dependencies(["database"])
            .with_config_schema(ConfigSchema::new().field("ttl", ConfigValueType::Integer));

        let yaml = serde_yaml::to_string(&metadata).unwrap();
        let parsed: ModuleMetadata = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.name, metadata.name);
        assert_eq!(parsed.dependencies, metadata.dependencies);
        assert!(parsed.config_schema.is_some());
    }
}
