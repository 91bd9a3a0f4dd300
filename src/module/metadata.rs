//! 模块元数据定义
//!
//! 定义描述文件 (module.yaml) 加载后得到的 [`ModuleDefinition`] 及其组成类型。
//! `dep_parents` / `dep_children` / `dep_missing` 由依赖解析器填充，加载器不会设置。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::version::ModuleVersion;

/// 默认优先级（越小越先加载）
pub const DEFAULT_PRIORITY: i64 = 1000;

/// 模块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// 插件
    Plugin,
    /// 主题
    Theme,
}

impl Default for ModuleType {
    fn default() -> Self {
        ModuleType::Plugin
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plugin" => Ok(ModuleType::Plugin),
            "theme" => Ok(ModuleType::Theme),
            other => Err(format!("未知的模块类型: '{}'", other)),
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleType::Plugin => write!(f, "plugin"),
            ModuleType::Theme => write!(f, "theme"),
        }
    }
}

/// 依赖声明：`(dependencyId, minVersion?)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// 依赖模块 ID（可以是宿主应用的伪模块 ID）
    pub module_id: String,

    /// 最低版本（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
}

impl Requirement {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            min_version: None,
        }
    }

    /// 设置最低版本
    pub fn at_least(mut self, version: impl Into<String>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    /// 检查给定版本是否满足最低版本要求（没有要求时总是满足）
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        match &self.min_version {
            Some(min) => ModuleVersion::parse(version).satisfies(&ModuleVersion::parse(min)),
            None => true,
        }
    }
}

/// 可选能力标记
///
/// 在加载时根据目录约定填充，解析器和生命周期管理器不做运行时探测。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// 有配置界面（声明了 settings，或存在 config/ 目录或 config.yaml）
    pub has_config_surface: bool,
    /// 有管理页面（存在 admin/ 目录）
    pub has_admin_page: bool,
}

/// 模块定义
///
/// 一个模块经过校验后的规范描述。校验失败的定义仍然保留
/// （`validation_errors` 非空），以便界面展示失败原因，但永远不会进入启用集合。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// 模块 ID（即目录名），在注册表内唯一
    pub id: String,

    /// 模块根目录
    pub root: PathBuf,

    /// 根目录是否可写（决定能否写入禁用标记）
    pub writable: bool,

    /// 是否启用
    pub enabled: bool,

    /// 显示名称
    pub name: String,

    /// 由名称派生的索引/排序键
    pub sname: String,

    /// 描述
    pub description: String,

    /// 作者
    pub author: String,

    /// 声明的版本
    pub version: String,

    /// 实际安装的版本（升级检测时使用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    /// 模块类型
    pub module_type: ModuleType,

    /// 加载优先级
    pub priority: i64,

    /// 依赖声明（保持声明顺序）
    pub requires: Vec<Requirement>,

    /// 所需权限；`None` 表示仅超级管理员可用
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,

    /// 配置入口：锚点名称 -> URL 后缀
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// 远程仓库地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,

    /// 支持地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support: Option<String>,

    /// 详情地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// 仓库相关度（仅供展示）
    #[serde(default)]
    pub score: f64,

    /// 可选能力
    #[serde(default)]
    pub capabilities: Capabilities,

    /// 校验错误
    #[serde(default)]
    pub validation_errors: Vec<String>,

    /// 已确认存在且满足的依赖
    #[serde(default)]
    pub dep_parents: Vec<String>,

    /// 依赖本模块的已启用模块
    #[serde(default)]
    pub dep_children: Vec<String>,

    /// 未满足的依赖：依赖 ID -> 原因
    #[serde(default)]
    pub dep_missing: BTreeMap<String, String>,
}

impl ModuleDefinition {
    /// 创建一个只有基本字段的定义
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            writable: false,
            enabled: false,
            name: String::new(),
            sname: String::new(),
            description: String::new(),
            author: String::new(),
            version: String::new(),
            current_version: None,
            module_type: ModuleType::default(),
            priority: DEFAULT_PRIORITY,
            requires: Vec::new(),
            permissions: None,
            settings: BTreeMap::new(),
            repository: None,
            tags: Vec::new(),
            support: None,
            details: None,
            score: 0.0,
            capabilities: Capabilities::default(),
            validation_errors: Vec::new(),
            dep_parents: Vec::new(),
            dep_children: Vec::new(),
            dep_missing: BTreeMap::new(),
        }
    }

    /// 是否通过校验
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }

    /// 解析后的版本
    pub fn parsed_version(&self) -> ModuleVersion {
        ModuleVersion::parse(&self.version)
    }

    /// 是否存在未满足的依赖
    pub fn has_missing_dependencies(&self) -> bool {
        !self.dep_missing.is_empty()
    }

    /// 清除解析器填充的派生字段
    pub(crate) fn clear_dependency_annotations(&mut self) {
        self.dep_parents.clear();
        self.dep_children.clear();
        self.dep_missing.clear();
    }
}

/// 模块在注册表中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 已启用
    Enabled,
    /// 已停用
    Disabled,
    /// 校验失败，不可启用
    Invalid,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Enabled => write!(f, "enabled"),
            ModuleState::Disabled => write!(f, "disabled"),
            ModuleState::Invalid => write!(f, "invalid"),
        }
    }
}
