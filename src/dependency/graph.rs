//! 依赖图
//!
//! 本模块提供模块依赖关系的图结构：有向边 `依赖方 -> 被依赖方`，
//! 支持正反向查询、传递闭包、拓扑排序与循环检测。
//!
//! 内部使用 `BTreeMap`/`BTreeSet` 存储，保证遍历顺序按名称字典序，
//! 从而使拓扑排序与循环枚举的结果完全确定。
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_edge("api", "database");
//! graph.add_edge("api", "cache");
//!
//! let order = graph.topological_order(None).unwrap();
//! // 被依赖方排在依赖方之前
//! assert_eq!(order, vec!["cache", "database", "api"]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::utils::{ModuleError, Result};

/// 模块依赖关系图
///
/// 边的方向为 `依赖方 -> 被依赖方`。所有修改操作幂等。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：模块名 -> 该模块依赖的模块集合
    edges: BTreeMap<String, BTreeSet<String>>,
    /// 反向边：模块名 -> 依赖该模块的模块集合
    reverse: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模块节点到图中
    ///
    /// 如果节点已存在则不做任何事。
    pub fn add_node(&mut self, name: &str) {
        self.edges.entry(name.to_string()).or_default();
        self.reverse.entry(name.to_string()).or_default();
    }

    /// 添加依赖关系
    ///
    /// 表示 `dependent` 依赖于 `dependency`。节点不存在时自动创建；
    /// 重复添加同一条边等价于只添加一次。
    pub fn add_edge(&mut self, dependent: &str, dependency: &str) {
        self.add_node(dependent);
        self.add_node(dependency);

        self.edges
            .get_mut(dependent)
            .expect("节点已创建")
            .insert(dependency.to_string());
        self.reverse
            .get_mut(dependency)
            .expect("节点已创建")
            .insert(dependent.to_string());
    }

    /// 移除一条依赖关系
    ///
    /// 边不存在时不做任何事；节点本身保留。
    pub fn remove_edge(&mut self, dependent: &str, dependency: &str) {
        if let Some(deps) = self.edges.get_mut(dependent) {
            deps.remove(dependency);
        }
        if let Some(dependents) = self.reverse.get_mut(dependency) {
            dependents.remove(dependent);
        }
    }

    /// 移除节点及其所有关联边
    pub fn remove_node(&mut self, name: &str) {
        if let Some(deps) = self.edges.remove(name) {
            for dep in deps {
                if let Some(dependents) = self.reverse.get_mut(&dep) {
                    dependents.remove(name);
                }
            }
        }

        if let Some(dependents) = self.reverse.remove(name) {
            for dependent in dependents {
                if let Some(deps) = self.edges.get_mut(&dependent) {
                    deps.remove(name);
                }
            }
        }
    }

    /// 获取模块的直接依赖集合
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<String> {
        self.edges.get(name).cloned().unwrap_or_default()
    }

    /// 获取直接依赖该模块的模块集合
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        self.reverse.get(name).cloned().unwrap_or_default()
    }

    /// 获取模块的所有传递依赖（不含自身）
    pub fn transitive_dependencies_of(&self, name: &str) -> BTreeSet<String> {
        Self::collect_reachable(&self.edges, name)
    }

    /// 获取所有传递依赖该模块的模块（不含自身）
    pub fn transitive_dependents_of(&self, name: &str) -> BTreeSet<String> {
        Self::collect_reachable(&self.reverse, name)
    }

    /// 沿邻接表收集从 `start` 出发可达的所有节点
    fn collect_reachable(
        adjacency: &BTreeMap<String, BTreeSet<String>>,
        start: &str,
    ) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut stack: Vec<String> = adjacency
            .get(start)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(node) = stack.pop() {
            if result.insert(node.clone()) {
                if let Some(next) = adjacency.get(&node) {
                    stack.extend(next.iter().cloned());
                }
            }
        }

        result
    }

    /// 拓扑排序（Kahn 算法）
    ///
    /// 返回一个顺序，保证每条边的被依赖方都排在依赖方之前。
    /// 同一层级内按名称字典序排列，结果对相同输入完全确定。
    ///
    /// # Arguments
    ///
    /// * `subset` - 限制排序范围的节点集合；`None` 表示整个图。
    ///   子集外的依赖不参与排序约束。
    ///
    /// # Errors
    ///
    /// 参与排序的节点间存在循环依赖时返回 `CircularDependency`。
    pub fn topological_order(&self, subset: Option<&BTreeSet<String>>) -> Result<Vec<String>> {
        let nodes: BTreeSet<String> = match subset {
            Some(s) => s.clone(),
            None => self.edges.keys().cloned().collect(),
        };

        // 入度 = 节点在考察范围内的依赖数
        let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();
        for node in &nodes {
            let degree = self
                .edges
                .get(node)
                .map(|deps| deps.iter().filter(|d| nodes.contains(*d)).count())
                .unwrap_or(0);
            in_degree.insert(node.clone(), degree);
        }

        // 就绪集合使用 BTreeSet，保证每步取出的都是字典序最小的节点
        let mut ready: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| node.clone())
            .collect();

        let mut result = Vec::with_capacity(nodes.len());

        while let Some(node) = ready.iter().next().cloned() {
            ready.remove(&node);
            result.push(node.clone());

            if let Some(dependents) = self.reverse.get(&node) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dependent.clone());
                        }
                    }
                }
            }
        }

        if result.len() != nodes.len() {
            let residual: BTreeSet<String> = nodes
                .into_iter()
                .filter(|n| !result.contains(n))
                .collect();
            let cycles = self.enumerate_cycles(&residual);
            let description = cycles
                .first()
                .map(|c| c.join(" -> "))
                .unwrap_or_else(|| residual.iter().cloned().collect::<Vec<_>>().join(", "));
            return Err(ModuleError::CircularDependency(description));
        }

        Ok(result)
    }

    /// 检测图中的循环依赖
    ///
    /// 返回所有找到的循环；每个循环是一条节点路径，起点在末尾重复出现
    /// （如 `["x", "y", "z", "x"]`）。无循环时返回空列表。
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        // Kahn 算法能消解的节点必然不在环上，循环只可能存在于残余子图中
        let all: BTreeSet<String> = self.edges.keys().cloned().collect();
        let resolved = self.kahn_resolved(&all);
        let residual: BTreeSet<String> = all
            .into_iter()
            .filter(|n| !resolved.contains(n))
            .collect();

        self.enumerate_cycles(&residual)
    }

    /// 运行 Kahn 算法，返回可以被消解（无环部分）的节点集合
    fn kahn_resolved(&self, nodes: &BTreeSet<String>) -> BTreeSet<String> {
        let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();
        for node in nodes {
            let degree = self
                .edges
                .get(node)
                .map(|deps| deps.iter().filter(|d| nodes.contains(*d)).count())
                .unwrap_or(0);
            in_degree.insert(node.clone(), degree);
        }

        let mut ready: Vec<String> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| node.clone())
            .collect();
        let mut resolved = BTreeSet::new();

        while let Some(node) = ready.pop() {
            resolved.insert(node.clone());
            if let Some(dependents) = self.reverse.get(&node) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(dependent.clone());
                        }
                    }
                }
            }
        }

        resolved
    }

    /// 在残余子图上用 DFS 枚举循环
    fn enumerate_cycles(&self, residual: &BTreeSet<String>) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();

        for start in residual {
            if visited.contains(start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = BTreeSet::new();
            self.dfs_cycle(start, residual, &mut visited, &mut path, &mut on_path, &mut cycles);
        }

        cycles
    }

    /// 循环枚举的 DFS 辅助函数
    fn dfs_cycle(
        &self,
        node: &str,
        residual: &BTreeSet<String>,
        visited: &mut BTreeSet<String>,
        path: &mut Vec<String>,
        on_path: &mut BTreeSet<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        path.push(node.to_string());
        on_path.insert(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if !residual.contains(dep) {
                    continue;
                }
                if on_path.contains(dep) {
                    // 找到循环：从路径中 dep 的位置截取并闭合
                    let start_idx = path.iter().position(|n| n == dep).expect("路径上的节点");
                    let mut cycle: Vec<String> = path[start_idx..].to_vec();
                    cycle.push(dep.clone());
                    cycles.push(cycle);
                } else if !visited.contains(dep) {
                    self.dfs_cycle(dep, residual, visited, path, on_path, cycles);
                }
            }
        }

        path.pop();
        on_path.remove(node);
        visited.insert(node.to_string());
    }

    /// 检查是否包含指定节点
    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// 获取所有节点名称（字典序）
    pub fn nodes(&self) -> Vec<String> {
        self.edges.keys().cloned().collect()
    }

    /// 获取节点数量
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 清空依赖图
    pub fn clear(&mut self) {
        self.edges.clear();
        self.reverse.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_new() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
    }

    #[test]
    fn test_add_node_idempotent() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        graph.add_node("a");

        assert!(graph.contains("a"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_add_edge() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("api", "database");

        assert!(graph.contains("api"));
        assert!(graph.contains("database"));
        assert!(graph.dependencies_of("api").contains("database"));
        assert!(graph.dependents_of("database").contains("api"));
    }

    #[test]
    fn test_add_edge_idempotent() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("a", "b");

        assert_eq!(graph.dependencies_of("a").len(), 1);
        assert_eq!(graph.dependents_of("b").len(), 1);
    }

    #[test]
    fn test_remove_edge() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("a", "c");

        graph.remove_edge("a", "b");

        assert_eq!(graph.dependencies_of("a").len(), 1);
        assert!(graph.dependents_of("b").is_empty());
        // 节点本身保留
        assert!(graph.contains("b"));

        // 移除不存在的边是空操作
        graph.remove_edge("a", "b");
        graph.remove_edge("x", "y");
    }

    #[test]
    fn test_remove_node() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("c", "b");
        graph.add_edge("b", "d");

        graph.remove_node("b");

        assert!(!graph.contains("b"));
        assert!(graph.dependencies_of("a").is_empty());
        assert!(graph.dependencies_of("c").is_empty());
        assert!(graph.dependents_of("d").is_empty());
    }

    #[test]
    fn test_transitive_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "d");

        let deps = graph.transitive_dependencies_of("a");
        assert_eq!(deps.len(), 3);
        assert!(deps.contains("b"));
        assert!(deps.contains("c"));
        assert!(deps.contains("d"));
    }

    #[test]
    fn test_transitive_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("b", "a");
        graph.add_edge("c", "b");

        let dependents = graph.transitive_dependents_of("a");
        assert_eq!(dependents.len(), 2);
        assert!(dependents.contains("b"));
        assert!(dependents.contains("c"));
    }

    #[test]
    fn test_topological_order_simple() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("app", "service");
        graph.add_edge("service", "database");

        let order = graph.topological_order(None).unwrap();
        assert_eq!(order, vec!["database", "service", "app"]);
    }

    #[test]
    fn test_topological_order_deterministic() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("app", "b");
        graph.add_edge("app", "a");
        graph.add_edge("app", "c");

        // 同层级按字典序
        let order = graph.topological_order(None).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "app"]);

        // 重复调用结果一致
        for _ in 0..10 {
            assert_eq!(graph.topological_order(None).unwrap(), order);
        }
    }

    #[test]
    fn test_topological_order_diamond() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("app", "a");
        graph.add_edge("app", "b");
        graph.add_edge("a", "c");
        graph.add_edge("b", "c");
        graph.add_edge("c", "d");

        let order = graph.topological_order(None).unwrap();

        let pos = |name: &str| order.iter().position(|x| x == name).unwrap();
        assert!(pos("d") < pos("c"));
        assert!(pos("c") < pos("a"));
        assert!(pos("c") < pos("b"));
        assert!(pos("a") < pos("app"));
        assert!(pos("b") < pos("app"));
    }

    #[test]
    fn test_topological_order_subset() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        let subset: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let order = graph.topological_order(Some(&subset)).unwrap();

        // 子集外的 c 不参与排序
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_topological_order_with_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");

        let result = graph.topological_order(None);
        assert!(matches!(
            result.unwrap_err(),
            ModuleError::CircularDependency(_)
        ));
    }

    #[test]
    fn test_detect_cycles_none() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("a", "c");

        assert!(graph.detect_cycles().is_empty());
    }

    #[test]
    fn test_detect_cycles_closes_with_start() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("x", "y");
        graph.add_edge("y", "z");
        graph.add_edge("z", "x");

        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);

        let cycle = &cycles[0];
        // 起点在末尾重复出现
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_detect_cycles_self_loop() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "a");

        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["a".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_detect_cycles_ignores_acyclic_part() {
        let mut graph = DependencyGraph::new();
        // 无环部分
        graph.add_edge("app", "service");
        // 有环部分
        graph.add_edge("x", "y");
        graph.add_edge("y", "x");

        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].contains(&"x".to_string()));
        assert!(cycles[0].contains(&"y".to_string()));
    }

    #[test]
    fn test_clear() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.clear();

        assert!(graph.is_empty());
    }

    #[test]
    fn test_nodes_sorted() {
        let mut graph = DependencyGraph::new();
        graph.add_node("c");
        graph.add_node("a");
        graph.add_node("b");

        assert_eq!(graph.nodes(), vec!["a", "b", "c"]);
    }
}
