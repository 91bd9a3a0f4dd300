//! 引擎配置
//!
//! 定义模块引擎的配置结构和加载逻辑。配置文件可以是 YAML 或 JSON，
//! 按扩展名选择格式。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::module::dependency::HostInfo;
use crate::module::loader::DefinitionLoader;
use crate::module::metadata::ModuleType;
use crate::module::version::ModuleVersion;
use crate::utils::{CoreError, Result};

/// 模块管理配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// 模块根目录列表（越靠前优先级越高）
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// 安装根目录（默认第一个根目录）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,

    /// 允许删除模块的根目录（默认只有安装根目录）
    #[serde(default)]
    pub deletable_roots: Vec<PathBuf>,

    /// 加载器期望的模块类型
    #[serde(default)]
    pub module_type: ModuleType,

    /// 救援模式：扫描时强制停用所有模块
    #[serde(default)]
    pub rescue_mode: bool,
}

/// 宿主应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// 宿主在依赖声明中的伪模块 ID
    #[serde(default = "default_host_id")]
    pub id: String,

    /// 宿主版本
    #[serde(default = "default_host_version")]
    pub version: String,
}

fn default_host_id() -> String {
    "core".to_string()
}

fn default_host_version() -> String {
    crate::VERSION.to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            id: default_host_id(),
            version: default_host_version(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModulesConfig,

    /// 宿主应用配置
    #[serde(default)]
    pub host: HostConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,
}

impl EngineConfig {
    /// 创建配置构建器
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// `.json` 扩展名按 JSON 解析，其余按 YAML 解析。
    ///
    /// # Errors
    ///
    /// 文件无法读取或内容无法解析时返回 `ConfigLoadFailed`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let mut config: EngineConfig = if is_json {
            serde_json::from_str(&content)
                .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?
        };

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: EngineConfig) {
        // 只覆盖非默认值的配置
        if !other.modules.roots.is_empty() {
            self.modules.roots = other.modules.roots;
        }
        if other.modules.install_root.is_some() {
            self.modules.install_root = other.modules.install_root;
        }
        if !other.modules.deletable_roots.is_empty() {
            self.modules.deletable_roots = other.modules.deletable_roots;
        }
        if other.modules.module_type != ModuleType::default() {
            self.modules.module_type = other.modules.module_type;
        }
        if other.modules.rescue_mode {
            self.modules.rescue_mode = true;
        }
        if other.host.id != default_host_id() {
            self.host.id = other.host.id;
        }
        if other.host.version != default_host_version() {
            self.host.version = other.host.version;
        }
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.logging.rotation != default_rotation() {
            self.logging.rotation = other.logging.rotation;
        }
        if other.config_path.is_some() {
            self.config_path = other.config_path;
        }
    }

    /// 校验配置
    ///
    /// # Errors
    ///
    /// 没有配置任何模块根目录，或宿主版本无法解析
    pub fn validate(&self) -> Result<()> {
        if self.modules.roots.is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "modules.roots".to_string(),
                reason: "至少需要一个模块根目录".to_string(),
            });
        }
        if self.host.id.trim().is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "host.id".to_string(),
                reason: "宿主 ID 不能为空".to_string(),
            });
        }
        if ModuleVersion::parse(&self.host.version).is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "host.version".to_string(),
                reason: format!("无法解析的版本号: '{}'", self.host.version),
            });
        }
        Ok(())
    }

    /// 新安装包的目标根目录
    pub fn install_root(&self) -> Option<&Path> {
        self.modules
            .install_root
            .as_deref()
            .or_else(|| self.modules.roots.first().map(PathBuf::as_path))
    }

    /// 安装器使用的根目录列表：安装根目录在前，其余根目录按原顺序排列
    pub fn install_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(self.modules.roots.len() + 1);
        if let Some(install_root) = self.install_root() {
            roots.push(install_root.to_path_buf());
        }
        for root in &self.modules.roots {
            if !roots.contains(root) {
                roots.push(root.clone());
            }
        }
        roots
    }

    /// 允许删除模块的根目录
    pub fn deletable_roots(&self) -> Vec<PathBuf> {
        if !self.modules.deletable_roots.is_empty() {
            return self.modules.deletable_roots.clone();
        }
        self.install_root()
            .map(|root| vec![root.to_path_buf()])
            .unwrap_or_default()
    }

    pub fn host_info(&self) -> HostInfo {
        HostInfo::new(self.host.id.clone(), self.host.version.clone())
    }

    /// 按配置的模块类型创建加载器
    pub fn loader(&self) -> DefinitionLoader {
        DefinitionLoader::new(self.modules.module_type)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// 添加模块根目录
    pub fn root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.roots.push(dir.into());
        self
    }

    /// 设置安装根目录
    pub fn install_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.install_root = Some(dir.into());
        self
    }

    /// 添加允许删除模块的根目录
    pub fn deletable_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.deletable_roots.push(dir.into());
        self
    }

    pub fn module_type(mut self, module_type: ModuleType) -> Self {
        self.config.modules.module_type = module_type;
        self
    }

    /// 启用救援模式
    pub fn rescue_mode(mut self) -> Self {
        self.config.modules.rescue_mode = true;
        self
    }

    /// 设置宿主信息
    pub fn host(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.config.host.id = id.into();
        self.config.host.version = version.into();
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
