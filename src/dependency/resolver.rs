//! 依赖解析器
//!
//! 在依赖图之上计算模块的启动/停止计划。解析过程是纯函数式的：
//! 不修改图，不触碰注册表，可以反复调用。

use std::collections::BTreeSet;

use crate::dependency::graph::DependencyGraph;
use crate::utils::Result;

/// 依赖解析器
///
/// 对依赖图的只读视图，产出确定性的启动与停止顺序。
pub struct DependencyResolver<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> DependencyResolver<'a> {
    /// 创建新的依赖解析器
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// 计算启动顺序
    ///
    /// 对给定子集做拓扑排序：每个被依赖方排在依赖方之前，
    /// 同一层级按名称字典序。
    ///
    /// # Errors
    ///
    /// 子集内存在循环依赖时返回 `CircularDependency`。
    pub fn resolve_start_order(&self, subset: &BTreeSet<String>) -> Result<Vec<String>> {
        self.graph.topological_order(Some(subset))
    }

    /// 计算停止顺序
    ///
    /// 启动顺序的逆序：依赖方先停止，被依赖方后停止。
    pub fn resolve_stop_order(&self, subset: &BTreeSet<String>) -> Result<Vec<String>> {
        let mut order = self.resolve_start_order(subset)?;
        order.reverse();
        Ok(order)
    }

    /// 校验依赖完整性
    ///
    /// 检查子集中每个模块的每个必需依赖是否都在已知模块集合中。
    ///
    /// # Returns
    ///
    /// 返回 `(依赖方, 缺失的依赖)` 元组列表；完整时为空。
    pub fn validate_dependencies(
        &self,
        subset: &BTreeSet<String>,
        known: &BTreeSet<String>,
    ) -> Vec<(String, String)> {
        let mut missing = Vec::new();

        for name in subset {
            for dep in self.graph.dependencies_of(name) {
                if !known.contains(&dep) {
                    missing.push((name.clone(), dep));
                }
            }
        }

        missing
    }

    /// 检测图中的循环依赖
    pub fn check_cycles(&self) -> Vec<Vec<String>> {
        self.graph.detect_cycles()
    }
}
