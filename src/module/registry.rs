//! 模块注册表
//!
//! 扫描一个或多个根目录，为每个候选目录调用加载器，并把结果划分为
//! 启用 / 停用 / 无效 三个集合。每次扫描都构建一个全新的快照；
//! 扫描之后只有生命周期管理器会翻转单个模块的归属。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use super::dependency::Resolution;
use super::loader::DefinitionLoader;
use super::metadata::{ModuleDefinition, ModuleState};
use super::parser::ModuleParser;
use super::version::ModuleVersion;
use crate::utils::DiscoveryError;

/// 禁用标记文件名（零字节文件）
pub const DISABLE_MARKER: &str = "disabled";

/// 模块注册表快照
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    /// 已启用的模块：module_id -> 定义
    enabled: BTreeMap<String, ModuleDefinition>,

    /// 已停用的模块
    disabled: BTreeMap<String, ModuleDefinition>,

    /// 校验失败的模块（不参与依赖解析，仅用于展示）
    invalid: BTreeMap<String, ModuleDefinition>,
}

/// 一次扫描的结果
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// 扫描得到的注册表
    pub registry: ModuleRegistry,

    /// 扫描过程中收集的错误
    pub errors: Vec<DiscoveryError>,

    /// 扫描完成时间
    pub scanned_at: DateTime<Utc>,
}

impl DiscoveryReport {
    /// 是否有错误
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 重复 ID 冲突
    pub fn conflicts(&self) -> impl Iterator<Item = &DiscoveryError> {
        self.errors.iter().filter(|e| e.is_conflict())
    }
}

/// 扫描期间用于处理跨根目录重复 ID 的版本索引项
struct SeenModule {
    version: ModuleVersion,
    root: PathBuf,
}

impl ModuleRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 扫描根目录，构建注册表
    ///
    /// # Arguments
    ///
    /// * `roots` - 按优先级排列的根目录（靠前的优先）
    /// * `loader` - 模块定义加载器
    /// * `rescue_mode` - 救援模式下所有模块都视为停用
    ///
    /// # Notes
    ///
    /// - 不存在的根目录被跳过
    /// - 以 `.` 开头的目录和没有描述文件的目录被跳过
    /// - 同一 ID 出现在多个根目录时，只有严格更高的版本才会替换先前的定义，
    ///   否则保留先出现的定义并记录冲突
    pub fn discover(roots: &[PathBuf], loader: &DefinitionLoader, rescue_mode: bool) -> DiscoveryReport {
        let mut registry = ModuleRegistry::new();
        let mut errors = Vec::new();
        let mut seen: HashMap<String, SeenModule> = HashMap::new();

        if rescue_mode {
            warn!("救援模式：所有模块都将以停用状态载入");
        }

        for root in roots {
            let candidates = match list_candidates(root, &mut errors) {
                Ok(Some(candidates)) => candidates,
                Ok(None) => {
                    debug!(root = ?root, "模块根目录不存在，跳过");
                    continue;
                }
                Err(e) => {
                    warn!(root = ?root, error = %e, "无法读取模块根目录");
                    errors.push(DiscoveryError::Unreadable {
                        path: root.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for (id, dir) in candidates {
                registry.consider(&id, &dir, loader, rescue_mode, &mut seen, &mut errors);
            }
        }

        info!(
            enabled = registry.enabled.len(),
            disabled = registry.disabled.len(),
            invalid = registry.invalid.len(),
            errors = errors.len(),
            "模块扫描完成"
        );

        DiscoveryReport {
            registry,
            errors,
            scanned_at: Utc::now(),
        }
    }

    /// 处理一个候选目录
    fn consider(
        &mut self,
        id: &str,
        dir: &Path,
        loader: &DefinitionLoader,
        rescue_mode: bool,
        seen: &mut HashMap<String, SeenModule>,
        errors: &mut Vec<DiscoveryError>,
    ) {
        let mut definition = match loader.load_dir(id, dir) {
            Ok(definition) => definition,
            Err(e) => {
                warn!(module_id = %id, path = ?dir, error = %e, "无法读取模块描述文件");
                errors.push(DiscoveryError::Unreadable {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        if !definition.is_valid() {
            warn!(module_id = %id, path = ?dir, "模块校验失败，已排除");
            errors.push(DiscoveryError::Validation {
                module_id: id.to_string(),
                path: dir.to_path_buf(),
                messages: definition.validation_errors.clone(),
            });
            if !seen.contains_key(id) {
                self.invalid.entry(id.to_string()).or_insert(definition);
            }
            return;
        }

        let version = definition.parsed_version();
        if let Some(existing) = seen.get(id) {
            if version > existing.version {
                warn!(
                    module_id = %id,
                    replaced = ?existing.root,
                    replaced_version = %existing.version,
                    winner = ?dir,
                    winner_version = %version,
                    "重复的模块 ID，使用更高版本"
                );
                self.enabled.remove(id);
                self.disabled.remove(id);
            } else {
                warn!(module_id = %id, kept = ?existing.root, rejected = ?dir, "重复的模块 ID，拒绝后出现的定义");
                errors.push(DiscoveryError::Conflict {
                    module_id: id.to_string(),
                    kept: existing.root.clone(),
                    kept_version: existing.version.to_string(),
                    rejected: dir.to_path_buf(),
                    rejected_version: version.to_string(),
                });
                return;
            }
        }

        seen.insert(
            id.to_string(),
            SeenModule {
                version,
                root: dir.to_path_buf(),
            },
        );
        self.invalid.remove(id);

        definition.enabled = !rescue_mode && !dir.join(DISABLE_MARKER).exists();
        debug!(module_id = %id, enabled = definition.enabled, "发现模块");
        self.insert(definition);
    }

    /// 插入一个定义，按 `enabled` 与校验结果放入对应集合
    ///
    /// 同一 ID 已存在时会被替换。
    pub fn insert(&mut self, definition: ModuleDefinition) {
        let id = definition.id.clone();
        self.enabled.remove(&id);
        self.disabled.remove(&id);
        self.invalid.remove(&id);

        if !definition.is_valid() {
            self.invalid.insert(id, definition);
        } else if definition.enabled {
            self.enabled.insert(id, definition);
        } else {
            self.disabled.insert(id, definition);
        }
    }

    /// 查找模块（启用或停用）
    pub fn get(&self, module_id: &str) -> Option<&ModuleDefinition> {
        self.enabled
            .get(module_id)
            .or_else(|| self.disabled.get(module_id))
    }

    /// 查找模块，包括校验失败的模块
    pub fn get_any(&self, module_id: &str) -> Option<&ModuleDefinition> {
        self.get(module_id).or_else(|| self.invalid.get(module_id))
    }

    /// 模块状态
    pub fn state(&self, module_id: &str) -> Option<ModuleState> {
        if self.enabled.contains_key(module_id) {
            Some(ModuleState::Enabled)
        } else if self.disabled.contains_key(module_id) {
            Some(ModuleState::Disabled)
        } else if self.invalid.contains_key(module_id) {
            Some(ModuleState::Invalid)
        } else {
            None
        }
    }

    /// 是否包含模块（启用或停用）
    pub fn contains(&self, module_id: &str) -> bool {
        self.get(module_id).is_some()
    }

    /// 模块是否已启用
    pub fn is_enabled(&self, module_id: &str) -> bool {
        self.enabled.contains_key(module_id)
    }

    pub fn enabled(&self) -> &BTreeMap<String, ModuleDefinition> {
        &self.enabled
    }

    pub fn disabled(&self) -> &BTreeMap<String, ModuleDefinition> {
        &self.disabled
    }

    pub fn invalid(&self) -> &BTreeMap<String, ModuleDefinition> {
        &self.invalid
    }

    /// 所有有效模块（启用在前，各自按 ID 排序）
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.enabled.values().chain(self.disabled.values())
    }

    /// 已启用模块的 ID
    pub fn enabled_ids(&self) -> Vec<String> {
        self.enabled.keys().cloned().collect()
    }

    /// 已停用模块的 ID
    pub fn disabled_ids(&self) -> Vec<String> {
        self.disabled.keys().cloned().collect()
    }

    /// 有效模块数量
    pub fn len(&self) -> usize {
        self.enabled.len() + self.disabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }

    /// 翻转单个模块的归属
    ///
    /// # Returns
    ///
    /// 模块存在且发生了移动时返回 `true`
    pub(crate) fn set_enabled(&mut self, module_id: &str, enabled: bool) -> bool {
        let (from, to) = if enabled {
            (&mut self.disabled, &mut self.enabled)
        } else {
            (&mut self.enabled, &mut self.disabled)
        };

        match from.remove(module_id) {
            Some(mut definition) => {
                definition.enabled = enabled;
                to.insert(module_id.to_string(), definition);
                true
            }
            None => false,
        }
    }

    /// 从注册表中移除模块
    pub(crate) fn remove(&mut self, module_id: &str) -> Option<ModuleDefinition> {
        self.enabled
            .remove(module_id)
            .or_else(|| self.disabled.remove(module_id))
            .or_else(|| self.invalid.remove(module_id))
    }

    /// 把解析结果写回各个定义的派生字段
    pub fn annotate(&mut self, resolution: &Resolution) {
        for (id, definition) in self.enabled.iter_mut().chain(self.disabled.iter_mut()) {
            definition.clear_dependency_annotations();
            if let Some(deps) = resolution.modules.get(id) {
                definition.dep_parents = deps.parents.clone();
                definition.dep_children = deps.children.clone();
                definition.dep_missing = deps.missing.clone();
            }
        }
    }
}

/// 列出根目录下的候选模块目录（按目录名排序）
///
/// 根目录不存在时返回 `Ok(None)`。目录名不是合法 UTF-8 的目录记录为不可读。
fn list_candidates(
    root: &Path,
    errors: &mut Vec<DiscoveryError>,
) -> std::io::Result<Option<Vec<(String, PathBuf)>>> {
    if !root.exists() {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(name = ?raw, "模块目录名不是合法的 UTF-8，跳过");
                errors.push(DiscoveryError::Unreadable {
                    path,
                    reason: "目录名不是合法的 UTF-8".to_string(),
                });
                continue;
            }
        };
        if name.starts_with('.') {
            trace!(path = ?path, "跳过隐藏目录");
            continue;
        }
        if ModuleParser::find_descriptor(&path).is_none() {
            trace!(path = ?path, "目录中没有描述文件，跳过");
            continue;
        }

        candidates.push((name, path));
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Some(candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::ModuleType;
    use tempfile::TempDir;

    fn write_module(root: &Path, id: &str, version: &str) -> PathBuf {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("module.yaml"),
            format!(
                "name: {id}\ndescription: test module\nauthor: tester\nversion: \"{version}\"\n"
            ),
        )
        .unwrap();
        dir
    }

    fn discover(roots: &[PathBuf]) -> DiscoveryReport {
        ModuleRegistry::discover(roots, &DefinitionLoader::new(ModuleType::Plugin), false)
    }

    #[test]
    fn test_discover_partitions_by_marker() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        write_module(&root, "alpha", "1.0");
        let beta = write_module(&root, "beta", "1.0");
        std::fs::write(beta.join(DISABLE_MARKER), "").unwrap();

        let report = discover(&[root]);
        assert!(!report.has_errors());
        assert_eq!(report.registry.enabled_ids(), vec!["alpha"]);
        assert_eq!(report.registry.disabled_ids(), vec!["beta"]);
        assert!(report.registry.get("alpha").unwrap().enabled);
        assert!(!report.registry.get("beta").unwrap().enabled);
    }

    #[test]
    fn test_rescue_mode_disables_everything() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        write_module(&root, "alpha", "1.0");

        let report = ModuleRegistry::discover(&[root], &DefinitionLoader::default(), true);
        assert!(report.registry.enabled().is_empty());
        assert_eq!(report.registry.state("alpha"), Some(ModuleState::Disabled));
    }

    #[test]
    fn test_skips_hidden_and_plain_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        write_module(&root, ".staging-x", "1.0");
        std::fs::create_dir_all(root.join("assets")).unwrap();
        std::fs::write(root.join("README"), "not a module").unwrap();

        let report = discover(&[root]);
        assert!(report.registry.is_empty());
        assert!(!report.has_errors());
    }

    #[test]
    fn test_invalid_module_is_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let dir = root.join("broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("module.yaml"), "name: Broken\n").unwrap();

        let report = discover(&[root]);
        assert!(report.registry.is_empty());
        assert_eq!(report.registry.state("broken"), Some(ModuleState::Invalid));
        assert!(matches!(
            &report.errors[0],
            DiscoveryError::Validation { module_id, messages, .. }
                if module_id == "broken" && messages.len() == 3
        ));
    }

    #[test]
    fn test_unparsable_descriptor_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let dir = root.join("garbage");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("module.yaml"), "name: [unclosed").unwrap();

        let report = discover(&[root]);
        assert!(report.registry.get_any("garbage").is_none());
        assert!(matches!(&report.errors[0], DiscoveryError::Unreadable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_directory_is_reported() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let bad = root.join(OsStr::from_bytes(b"gal\xfflery"));
        std::fs::create_dir_all(&bad).unwrap();
        write_module(&root, "alpha", "1.0");

        let report = discover(&[root]);
        assert_eq!(report.registry.enabled_ids(), vec!["alpha"]);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            DiscoveryError::Unreadable { path, .. } if path == &bad
        ));
    }

    #[test]
    fn test_duplicate_equal_version_keeps_first() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let kept = write_module(first.path(), "x", "1.0");
        let rejected = write_module(second.path(), "x", "1.0");

        let report = discover(&[first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(report.registry.get("x").unwrap().root, kept);
        assert_eq!(report.conflicts().count(), 1);
        match &report.errors[0] {
            DiscoveryError::Conflict { kept: k, rejected: r, .. } => {
                assert_eq!(k, &kept);
                assert_eq!(r, &rejected);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_higher_version_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_module(first.path(), "x", "1.0");
        let newer = write_module(second.path(), "x", "1.1");
        std::fs::write(newer.join(DISABLE_MARKER), "").unwrap();

        let report = discover(&[first.path().to_path_buf(), second.path().to_path_buf()]);
        assert!(!report.has_errors());
        let winner = report.registry.get("x").unwrap();
        assert_eq!(winner.root, newer);
        assert_eq!(winner.version, "1.1");
        assert_eq!(report.registry.state("x"), Some(ModuleState::Disabled));
        assert_eq!(report.registry.len(), 1);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let report = discover(&[PathBuf::from("/definitely/not/here")]);
        assert!(report.registry.is_empty());
        assert!(!report.has_errors());
    }

    #[test]
    fn test_set_enabled_flips_membership() {
        let mut registry = ModuleRegistry::new();
        let mut def = ModuleDefinition::new("a", "/m/a");
        def.enabled = true;
        registry.insert(def);

        assert!(registry.set_enabled("a", false));
        assert_eq!(registry.state("a"), Some(ModuleState::Disabled));
        assert!(!registry.get("a").unwrap().enabled);
        assert!(!registry.set_enabled("a", false));
        assert!(!registry.set_enabled("missing", true));
    }
}
