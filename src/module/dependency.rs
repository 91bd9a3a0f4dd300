//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构和解析器。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，用于计算级联停用的顺序
//! - [`DependencyResolver`] - 依赖解析器，对注册表快照计算缺失依赖、反向依赖和需要强制停用的模块
//!
//! 解析器是纯计算：不做 IO，不修改注册表，对同一快照多次运行结果完全相同。
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_module("module_a");
//! graph.add_module("module_b");
//! graph.add_dependency("module_a", "module_b");
//!
//! assert_eq!(graph.get_dependencies("module_a"), vec!["module_b".to_string()]);
//! assert!(!graph.has_cycle());
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::metadata::{ModuleDefinition, Requirement};
use super::registry::ModuleRegistry;
use crate::utils::{CoreError, Result};

/// 模块依赖关系图
///
/// 节点和边都保存在有序集合中，遍历顺序与插入顺序无关，
/// 因此排序结果可以复现。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：模块 ID -> 该模块依赖的模块
    edges: BTreeMap<String, BTreeSet<String>>,
    /// 反向边：模块 ID -> 依赖该模块的模块
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模块节点到图中
    ///
    /// 如果模块已存在，则不会重复添加。
    pub fn add_module(&mut self, module_id: &str) {
        self.edges.entry(module_id.to_string()).or_default();
        self.reverse_edges.entry(module_id.to_string()).or_default();
    }

    /// 添加依赖关系
    ///
    /// 表示 `module_id` 依赖于 `dependency_id`。
    /// 如果模块不存在，会自动添加。
    ///
    /// ```rust
    /// use chips_modules::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("module_a", "module_b");
    ///
    /// assert!(graph.get_dependents("module_b").contains(&"module_a".to_string()));
    /// ```
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str) {
        self.add_module(module_id);
        self.add_module(dependency_id);

        self.edges
            .entry(module_id.to_string())
            .or_default()
            .insert(dependency_id.to_string());
        self.reverse_edges
            .entry(dependency_id.to_string())
            .or_default()
            .insert(module_id.to_string());
    }

    /// 获取模块的直接依赖列表
    pub fn get_dependencies(&self, module_id: &str) -> Vec<String> {
        self.edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 获取依赖该模块的模块列表
    pub fn get_dependents(&self, module_id: &str) -> Vec<String> {
        self.reverse_edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 检测是否存在循环依赖
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找循环依赖路径
    ///
    /// # Returns
    ///
    /// 如果存在循环，返回闭合的循环路径（首尾相同）；否则返回 `None`
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        let mut path = Vec::new();

        for node in self.edges.keys() {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }

        None
    }

    fn find_cycle_util(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        rec_stack: &mut BTreeSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if rec_stack.contains(node) {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        if !visited.insert(node.to_string()) {
            return None;
        }
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(neighbors) = self.edges.get(node) {
            for neighbor in neighbors {
                if let Some(cycle) = self.find_cycle_util(neighbor, visited, rec_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    /// 拓扑排序（Kahn 算法）
    ///
    /// 依赖在依赖方之前；没有先后约束的节点按 ID 排序。
    ///
    /// # Errors
    ///
    /// 存在循环依赖时返回 `CoreError::CircularDependency`
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CoreError::CircularDependency(cycle.join(" -> ")));
        }

        // 入度 = 该模块依赖的模块数量
        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());
        while let Some(node) = queue.pop_front() {
            result.push(node.to_string());

            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if result.len() != self.edges.len() {
            return Err(CoreError::CircularDependency("无法完成拓扑排序".to_string()));
        }

        Ok(result)
    }

    /// 获取停用顺序（依赖方在前）
    pub fn get_unload_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_sort()?;
        order.reverse();
        Ok(order)
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 获取图中模块数量
    pub fn module_count(&self) -> usize {
        self.edges.len()
    }

    /// 检查是否包含指定模块
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.edges.contains_key(module_id)
    }
}

/// 宿主应用信息
///
/// 宿主以伪模块的形式出现在依赖声明中。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// 伪模块 ID
    pub id: String,
    /// 宿主版本
    pub version: String,
}

impl HostInfo {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        Self::new("core", crate::VERSION)
    }
}

/// 单个模块的依赖解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleDependencies {
    /// 已确认存在、启用且版本满足的依赖
    pub parents: Vec<String>,
    /// 依赖本模块的已启用模块
    pub children: Vec<String>,
    /// 未满足的依赖：依赖 ID -> 原因
    pub missing: BTreeMap<String, String>,
}

/// 需要强制停用的模块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedDisable {
    /// 模块 ID
    pub module_id: String,
    /// 依赖 ID -> 原因
    pub reasons: BTreeMap<String, String>,
}

/// 一次解析的完整结果
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// 每个有效模块的解析结果
    pub modules: BTreeMap<String, ModuleDependencies>,
    /// 当前启用但依赖不满足的模块，依赖方在前
    pub force_disable: Vec<ForcedDisable>,
}

impl Resolution {
    /// 模块的未满足依赖
    pub fn missing(&self, module_id: &str) -> Option<&BTreeMap<String, String>> {
        self.modules
            .get(module_id)
            .map(|deps| &deps.missing)
            .filter(|missing| !missing.is_empty())
    }

    /// 是否所有模块的依赖都已满足
    pub fn is_clean(&self) -> bool {
        self.modules.values().all(|deps| deps.missing.is_empty())
    }
}

/// 依赖解析器
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    host: HostInfo,
}

impl DependencyResolver {
    /// 创建解析器
    pub fn new(host: HostInfo) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// 解析注册表快照
    ///
    /// # Notes
    ///
    /// - 先计算与启用状态无关的问题（宿主版本、未安装、版本过低）
    /// - 再从当前启用集合出发反复剔除依赖不满足的模块，直到集合稳定；
    ///   被剔除的模块即为需要强制停用的模块
    /// - 最后按稳定后的启用集合建立父子关系
    pub fn resolve(&self, registry: &ModuleRegistry) -> Resolution {
        // 1. 与启用状态无关的问题
        let mut static_issues: BTreeMap<&str, BTreeMap<String, String>> = BTreeMap::new();
        for module in registry.modules() {
            let issues: BTreeMap<String, String> = module
                .requires
                .iter()
                .filter(|req| req.module_id != module.id)
                .filter_map(|req| {
                    self.static_issue(registry, req)
                        .map(|reason| (req.module_id.clone(), reason))
                })
                .collect();
            static_issues.insert(module.id.as_str(), issues);
        }

        // 2. 计算稳定的启用集合
        let mut effective: BTreeSet<&str> = registry.enabled().keys().map(String::as_str).collect();
        loop {
            let dropped: Vec<&str> = effective
                .iter()
                .copied()
                .filter(|id| {
                    let has_static = static_issues.get(id).is_some_and(|issues| !issues.is_empty());
                    has_static
                        || registry.get(id).is_some_and(|module| {
                            self.module_requirements(module)
                                .any(|req| !effective.contains(req.module_id.as_str()))
                        })
                })
                .collect();

            if dropped.is_empty() {
                break;
            }
            for id in dropped {
                effective.remove(id);
            }
        }

        // 3. 父子关系与缺失原因
        let mut modules: BTreeMap<String, ModuleDependencies> = registry
            .modules()
            .map(|m| (m.id.clone(), ModuleDependencies::default()))
            .collect();

        for module in registry.modules() {
            let mut parents = Vec::new();
            let mut missing = static_issues.remove(module.id.as_str()).unwrap_or_default();

            for req in self.module_requirements(module) {
                if missing.contains_key(&req.module_id) {
                    continue;
                }
                if !effective.contains(req.module_id.as_str()) {
                    missing.insert(
                        req.module_id.clone(),
                        format!("requires {} module, which is disabled", req.module_id),
                    );
                    continue;
                }

                parents.push(req.module_id.clone());
                if effective.contains(module.id.as_str()) {
                    if let Some(parent) = modules.get_mut(&req.module_id) {
                        parent.children.push(module.id.clone());
                    }
                }
            }

            if let Some(entry) = modules.get_mut(&module.id) {
                entry.parents = parents;
                entry.missing = missing;
            }
        }

        // 4. 强制停用列表
        let forced_ids: Vec<&str> = registry
            .enabled()
            .keys()
            .map(String::as_str)
            .filter(|id| !effective.contains(id))
            .collect();
        let force_disable = self
            .order_forced(registry, &forced_ids)
            .into_iter()
            .map(|id| ForcedDisable {
                reasons: modules.get(&id).map(|d| d.missing.clone()).unwrap_or_default(),
                module_id: id,
            })
            .collect::<Vec<_>>();

        if !force_disable.is_empty() {
            debug!(
                modules = ?force_disable.iter().map(|f| &f.module_id).collect::<Vec<_>>(),
                "存在依赖不满足的已启用模块"
            );
        }

        Resolution {
            modules,
            force_disable,
        }
    }

    /// 检查一条依赖声明中与启用状态无关的部分
    fn static_issue(&self, registry: &ModuleRegistry, req: &Requirement) -> Option<String> {
        if req.module_id == self.host.id {
            return match &req.min_version {
                Some(min) if !req.is_satisfied_by(&self.host.version) => Some(format!(
                    "requires {} version {}, but version {} is running",
                    self.host.id, min, self.host.version
                )),
                _ => None,
            };
        }

        match registry.get(&req.module_id) {
            None => Some(format!("requires {} module, which is not installed", req.module_id)),
            Some(dep) if !req.is_satisfied_by(&dep.version) => Some(format!(
                "requires {} module version {}, but version {} is installed",
                req.module_id,
                req.min_version.as_deref().unwrap_or_default(),
                dep.version
            )),
            Some(_) => None,
        }
    }

    /// 模块对其他模块的依赖（排除宿主与自身）
    fn module_requirements<'m>(
        &'m self,
        module: &'m ModuleDefinition,
    ) -> impl Iterator<Item = &'m Requirement> + 'm {
        module
            .requires
            .iter()
            .filter(move |req| req.module_id != self.host.id && req.module_id != module.id)
    }

    /// 按依赖方在前的顺序排列强制停用的模块
    fn order_forced(&self, registry: &ModuleRegistry, forced: &[&str]) -> Vec<String> {
        let mut graph = DependencyGraph::new();
        for id in forced {
            graph.add_module(id);
        }
        for id in forced {
            if let Some(module) = registry.get(id) {
                for req in self.module_requirements(module) {
                    if forced.contains(&req.module_id.as_str()) {
                        graph.add_dependency(id, &req.module_id);
                    }
                }
            }
        }

        match graph.get_unload_order() {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "强制停用列表中存在循环依赖，按 ID 顺序处理");
                forced.iter().map(|id| id.to_string()).collect()
            }
        }
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new(HostInfo::default())
    }
}
