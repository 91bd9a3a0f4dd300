//! 模块生命周期管理
//!
//! 负责把依赖解析的结果落实到注册表和文件系统：
//! - 启用 / 停用（写入或删除禁用标记，翻转单个模块的归属）
//! - 强制停用依赖不满足的模块，并汇总结果
//! - 删除模块目录
//! - 计算确定性的加载顺序
//!
//! 每次归属发生变化后都会重新解析依赖，保证 `dep_missing` / `dep_children` 与当前状态一致。
//!
//! # 状态转换
//!
//! ```text
//! Disabled ──activate──> Enabled ──deactivate──> Disabled
//!     │                                              │
//!     └──────────────────delete──────────────────────┘ (终止)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::dependency::{DependencyResolver, ForcedDisable, Resolution};
use super::metadata::ModuleDefinition;
use super::registry::{ModuleRegistry, DISABLE_MARKER};
use crate::utils::{CoreError, Result};

/// 强制停用失败的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDisable {
    /// 模块 ID
    pub module_id: String,
    /// 依赖 ID -> 原因
    pub reasons: BTreeMap<String, String>,
    /// 停用失败的原因
    pub error: String,
}

/// 强制停用的汇总结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// 成功停用的模块
    pub disabled: Vec<ForcedDisable>,
    /// 停用失败、仍处于启用状态的模块
    pub failed: Vec<FailedDisable>,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.disabled.is_empty() && self.failed.is_empty()
    }

    /// 面向运维人员的一次性通知文本，没有任何条目时返回 `None`
    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut lines = Vec::new();
        if !self.disabled.is_empty() {
            lines.push("以下模块因依赖不满足已被停用:".to_string());
            for entry in &self.disabled {
                lines.push(format!("  - {}: {}", entry.module_id, join_reasons(&entry.reasons)));
            }
        }
        if !self.failed.is_empty() {
            lines.push("以下模块依赖不满足，但无法停用，仍处于启用状态:".to_string());
            for entry in &self.failed {
                lines.push(format!(
                    "  - {}: {} ({})",
                    entry.module_id,
                    join_reasons(&entry.reasons),
                    entry.error
                ));
            }
        }
        Some(lines.join("\n"))
    }
}

fn join_reasons(reasons: &BTreeMap<String, String>) -> String {
    reasons.values().cloned().collect::<Vec<_>>().join("; ")
}

/// 模块生命周期管理器
///
/// 独占注册表的可变状态。
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    registry: ModuleRegistry,
    resolver: DependencyResolver,
    resolution: Resolution,
    /// 允许删除其下模块目录的根目录
    deletable_roots: Vec<PathBuf>,
}

impl LifecycleManager {
    /// 创建管理器并立即解析一次依赖
    ///
    /// # Arguments
    ///
    /// * `registry` - 扫描得到的注册表
    /// * `resolver` - 依赖解析器
    /// * `deletable_roots` - 允许删除模块的根目录
    pub fn new(registry: ModuleRegistry, resolver: DependencyResolver, deletable_roots: Vec<PathBuf>) -> Self {
        let mut manager = Self {
            registry,
            resolver,
            resolution: Resolution::default(),
            deletable_roots,
        };
        manager.refresh();
        manager
    }

    /// 重新解析依赖并写回注册表
    pub fn refresh(&mut self) -> &Resolution {
        self.resolution = self.resolver.resolve(&self.registry);
        self.registry.annotate(&self.resolution);
        &self.resolution
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 最近一次解析结果
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// 停用模块
    ///
    /// # Errors
    ///
    /// - `ModuleNotFound` - 模块不存在
    /// - `ModuleAlreadyDisabled` - 模块已停用
    /// - `ModuleNotWritable` - 目录不可写
    /// - `ModuleHasDependents` - 仍有已启用的模块依赖它
    pub fn deactivate(&mut self, module_id: &str) -> Result<()> {
        self.deactivate_guarded(module_id, &BTreeSet::new())
    }

    /// 停用模块，`ignored` 中的依赖方不阻止停用
    fn deactivate_guarded(&mut self, module_id: &str, ignored: &BTreeSet<&str>) -> Result<()> {
        let definition = match self.registry.enabled().get(module_id) {
            Some(definition) => definition,
            None if self.registry.contains(module_id) => {
                return Err(CoreError::ModuleAlreadyDisabled(module_id.to_string()))
            }
            None => return Err(CoreError::ModuleNotFound(module_id.to_string())),
        };

        if !definition.writable {
            return Err(CoreError::ModuleNotWritable(module_id.to_string()));
        }

        let dependents: Vec<String> = definition
            .dep_children
            .iter()
            .filter(|child| !ignored.contains(child.as_str()))
            .cloned()
            .collect();
        if !dependents.is_empty() {
            return Err(CoreError::ModuleHasDependents {
                module: module_id.to_string(),
                dependents,
            });
        }

        std::fs::write(definition.root.join(DISABLE_MARKER), b"")?;
        self.registry.set_enabled(module_id, false);
        self.refresh();

        info!(module_id = %module_id, "模块已停用");
        Ok(())
    }

    /// 启用模块
    ///
    /// # Errors
    ///
    /// - `ModuleNotFound` - 模块不存在
    /// - `ModuleAlreadyEnabled` - 模块已启用
    /// - `ModuleNotWritable` - 目录不可写
    /// - `UnmetDependencies` - 存在未满足的依赖
    pub fn activate(&mut self, module_id: &str) -> Result<()> {
        let definition = match self.registry.disabled().get(module_id) {
            Some(definition) => definition,
            None if self.registry.contains(module_id) => {
                return Err(CoreError::ModuleAlreadyEnabled(module_id.to_string()))
            }
            None => return Err(CoreError::ModuleNotFound(module_id.to_string())),
        };

        if !definition.writable {
            return Err(CoreError::ModuleNotWritable(module_id.to_string()));
        }
        if definition.has_missing_dependencies() {
            return Err(CoreError::UnmetDependencies {
                module: module_id.to_string(),
                missing: definition.dep_missing.values().cloned().collect(),
            });
        }

        match std::fs::remove_file(definition.root.join(DISABLE_MARKER)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.registry.set_enabled(module_id, true);
        self.refresh();

        info!(module_id = %module_id, "模块已启用");
        Ok(())
    }

    /// 强制停用依赖不满足的模块
    ///
    /// 逐个处理，单个模块失败不影响其余模块。同一批次中的依赖方不会阻止停用。
    pub fn apply_forced_disables(&mut self, forced: &[ForcedDisable]) -> CascadeReport {
        let batch: BTreeSet<&str> = forced.iter().map(|f| f.module_id.as_str()).collect();
        let mut report = CascadeReport::default();

        for entry in forced {
            if !self.registry.is_enabled(&entry.module_id) {
                debug!(module_id = %entry.module_id, "模块已不在启用集合中，跳过强制停用");
                continue;
            }

            match self.deactivate_guarded(&entry.module_id, &batch) {
                Ok(()) => {
                    warn!(module_id = %entry.module_id, reasons = ?entry.reasons, "依赖不满足，模块已被强制停用");
                    report.disabled.push(entry.clone());
                }
                Err(e) => {
                    warn!(module_id = %entry.module_id, error = %e, "依赖不满足，但无法停用模块");
                    report.failed.push(FailedDisable {
                        module_id: entry.module_id.clone(),
                        reasons: entry.reasons.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// 删除模块目录
    ///
    /// 删除不可恢复；调用方需要在边界处确认操作意图。
    ///
    /// # Errors
    ///
    /// - `ModuleNotFound` - 模块不存在
    /// - `DeleteNotAllowed` - 目录不在可删除的根目录下
    /// - `ModuleHasDependents` - 仍有已启用的模块依赖它
    pub fn delete(&mut self, module_id: &str) -> Result<ModuleDefinition> {
        let definition = self
            .registry
            .get_any(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        if !self.is_deletable(&definition.root) {
            return Err(CoreError::DeleteNotAllowed {
                module_id: module_id.to_string(),
                path: definition.root.clone(),
            });
        }
        if !definition.dep_children.is_empty() {
            return Err(CoreError::ModuleHasDependents {
                module: module_id.to_string(),
                dependents: definition.dep_children.clone(),
            });
        }

        std::fs::remove_dir_all(&definition.root)?;
        let removed = self
            .registry
            .remove(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;
        self.refresh();

        info!(module_id = %module_id, path = ?removed.root, "模块已删除");
        Ok(removed)
    }

    /// 目录是否位于某个可删除根目录之下（不能是根目录本身）
    fn is_deletable(&self, root: &Path) -> bool {
        let Ok(target) = root.canonicalize() else {
            return false;
        };

        self.deletable_roots.iter().any(|allowed| {
            allowed
                .canonicalize()
                .map(|allowed| target != allowed && target.starts_with(&allowed))
                .unwrap_or(false)
        })
    }

    /// 已启用模块的加载顺序
    ///
    /// 按 `priority` 升序，相同时按名称（不区分大小写），再按 ID。
    pub fn load_order(&self) -> Vec<&ModuleDefinition> {
        let mut modules: Vec<&ModuleDefinition> = self.registry.enabled().values().collect();
        modules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        modules
    }

    /// 加载顺序中的模块 ID
    pub fn load_order_ids(&self) -> Vec<String> {
        self.load_order().into_iter().map(|m| m.id.clone()).collect()
    }
}
