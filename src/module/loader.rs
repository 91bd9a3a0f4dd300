//! 模块定义加载器
//!
//! 把一个模块的描述信息（磁盘上的描述文件或内存中的键值表）转换为
//! [`ModuleDefinition`]。校验规则全部是非致命的：错误被累积到
//! `validation_errors` 中，定义本身仍然返回，由调用方决定如何处理。
//!
//! 加载器不了解其他模块，唯一的副作用是对模块目录做只读探测（可写性、能力标记）。

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, trace};

use super::metadata::{Capabilities, ModuleDefinition, ModuleType, Requirement, DEFAULT_PRIORITY};
use super::parser::{DescriptorMap, ModuleParser};
use crate::utils::{CoreError, Result};

/// 描述信息来源
#[derive(Debug, Clone)]
pub enum DescriptorSource {
    /// 模块目录（描述文件位于目录根部）
    Directory(PathBuf),
    /// 内存中的键值表（测试替身、尚未解压到磁盘的安装包）
    Map {
        /// 模块将占用的根目录
        root: PathBuf,
        /// 键值表
        map: DescriptorMap,
    },
}

/// 模块定义加载器
#[derive(Debug, Clone)]
pub struct DefinitionLoader {
    /// 期望的模块类型
    expected_type: ModuleType,
}

impl Default for DefinitionLoader {
    fn default() -> Self {
        Self::new(ModuleType::Plugin)
    }
}

impl DefinitionLoader {
    /// 创建期望指定模块类型的加载器
    pub fn new(expected_type: ModuleType) -> Self {
        Self { expected_type }
    }

    /// 期望的模块类型
    pub fn expected_type(&self) -> ModuleType {
        self.expected_type
    }

    /// 加载模块定义
    ///
    /// # Errors
    ///
    /// 只有描述文件缺失或无法解析时返回错误；字段校验失败不会返回错误，
    /// 而是记录在返回值的 `validation_errors` 中。
    pub fn load(&self, id: &str, source: DescriptorSource) -> Result<ModuleDefinition> {
        match source {
            DescriptorSource::Directory(dir) => self.load_dir(id, &dir),
            DescriptorSource::Map { root, map } => Ok(self.load_map(id, root, &map)),
        }
    }

    /// 从模块目录加载
    pub fn load_dir(&self, id: &str, dir: &Path) -> Result<ModuleDefinition> {
        let descriptor = ModuleParser::find_descriptor(dir).ok_or_else(|| {
            CoreError::InvalidMetadata(format!("目录 {:?} 中没有模块描述文件", dir))
        })?;
        trace!(module_id = %id, path = ?descriptor, "读取描述文件");

        let map = ModuleParser::parse_file(&descriptor)?;
        let mut definition = self.load_map(id, dir.to_path_buf(), &map);
        if !definition.version.is_empty() {
            definition.current_version = Some(definition.version.clone());
        }
        Ok(definition)
    }

    /// 从键值表加载
    pub fn load_map(&self, id: &str, root: PathBuf, map: &DescriptorMap) -> ModuleDefinition {
        let mut definition = ModuleDefinition::new(id, root);
        let mut errors = Vec::new();

        if id.trim().is_empty() {
            errors.push("模块 ID 不能为空".to_string());
        }

        // 1. 必填字段
        definition.name = scalar_field(map, "name");
        definition.description = scalar_field(map, "description");
        definition.author = scalar_field(map, "author");
        definition.version = match map.get("version").map(version_scalar) {
            None => String::new(),
            Some(Ok(version)) => version,
            Some(Err((lossy, error))) => {
                errors.push(error);
                lossy
            }
        };

        for (value, label) in [
            (&definition.name, "名称"),
            (&definition.description, "描述"),
            (&definition.author, "作者"),
            (&definition.version, "版本号"),
        ] {
            if value.is_empty() {
                errors.push(format!("模块{}不能为空", label));
            }
        }

        // 2. 模块类型
        definition.module_type = match map.get("type") {
            None | Some(Value::Null) => self.expected_type,
            Some(value) => match scalar_to_string(value).parse::<ModuleType>() {
                Ok(declared) if declared == self.expected_type => declared,
                Ok(declared) => {
                    errors.push(format!(
                        "描述文件声明的类型为 {}，但期望的类型为 {}",
                        declared, self.expected_type
                    ));
                    declared
                }
                Err(e) => {
                    errors.push(e);
                    self.expected_type
                }
            },
        };

        // 3. 依赖、优先级及可选字段
        definition.requires = normalize_requires(id, map.get("requires"), &mut errors);
        definition.priority = coerce_priority(map.get("priority"));
        definition.permissions = optional_field(map, "permissions");
        definition.settings = settings_field(map.get("settings"));
        definition.repository = optional_field(map, "repository");
        definition.support = optional_field(map, "support");
        definition.details = optional_field(map, "details");
        definition.tags = tags_field(map.get("tags"));
        definition.score = map.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        definition.sname = sanitize_name(&definition.name, id);

        // 4. 只读探测
        definition.writable = probe_writable(&definition.root);
        definition.capabilities = probe_capabilities(&definition.root, &definition.settings);

        if !errors.is_empty() {
            debug!(module_id = %id, errors = ?errors, "模块定义校验失败");
        }
        definition.validation_errors = errors;
        definition
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// 版本号标量
///
/// 整数可以不加引号。未加引号的小数在 YAML 中是浮点数，`1.10` 会被读成 `1.1`，
/// 原文已经无法恢复，因此返回按数字转换的结果和一条校验错误。
fn version_scalar(value: &Value) -> std::result::Result<String, (String, String)> {
    match value {
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => Err((
            n.to_string(),
            format!("版本号 {} 必须写成带引号的字符串，例如 \"{}\"", n, n),
        )),
        other => Ok(scalar_to_string(other)),
    }
}

/// 依赖声明中的最低版本，格式错误时记录校验错误
fn min_version(value: &Value, dependency: &str, errors: &mut Vec<String>) -> String {
    version_scalar(value).unwrap_or_else(|(lossy, error)| {
        errors.push(format!("依赖 {}: {}", dependency, error));
        lossy
    })
}

fn scalar_field(map: &DescriptorMap, key: &str) -> String {
    map.get(key).map(scalar_to_string).unwrap_or_default()
}

fn optional_field(map: &DescriptorMap, key: &str) -> Option<String> {
    let value = scalar_field(map, key);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn coerce_priority(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(DEFAULT_PRIORITY),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_PRIORITY),
        _ => DEFAULT_PRIORITY,
    }
}

fn settings_field(value: Option<&Value>) -> std::collections::BTreeMap<String, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(anchor, url)| {
                let url = scalar_to_string(url);
                if anchor.is_empty() || url.is_empty() {
                    None
                } else {
                    Some((anchor.clone(), url))
                }
            })
            .collect(),
        _ => Default::default(),
    }
}

fn tags_field(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items.iter().map(scalar_to_string).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// 规范化依赖声明
///
/// 接受 `[id]`、`[id, minVersion]`、裸 `id` 字符串、`{id, version}` 以及
/// `id -> minVersion` 映射；格式错误的条目被丢弃，重复的 ID 只保留第一个。
/// 未加引号的小数版本号记录为校验错误。
fn normalize_requires(module_id: &str, value: Option<&Value>, errors: &mut Vec<String>) -> Vec<Requirement> {
    let candidates: Vec<Option<Requirement>> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(|item| parse_requirement(item, errors)).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|id| parse_requirement(&Value::String(id.to_string()), errors))
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(id, min)| {
                let id = id.trim();
                if id.is_empty() {
                    return None;
                }
                let min = min_version(min, id, errors);
                let requirement = Requirement::new(id);
                Some(if min.is_empty() {
                    requirement
                } else {
                    requirement.at_least(min)
                })
            })
            .collect(),
        Some(other) => vec![parse_requirement(other, errors)],
    };

    let mut requires: Vec<Requirement> = Vec::new();
    for candidate in candidates {
        match candidate {
            Some(req) if !requires.iter().any(|r| r.module_id == req.module_id) => requires.push(req),
            Some(req) => debug!(module_id, dependency = %req.module_id, "忽略重复的依赖声明"),
            None => debug!(module_id, "丢弃格式错误的依赖声明"),
        }
    }
    requires
}

fn parse_requirement(item: &Value, errors: &mut Vec<String>) -> Option<Requirement> {
    let (id, min) = match item {
        Value::String(s) => (s.trim().to_string(), String::new()),
        Value::Array(parts) if (1..=2).contains(&parts.len()) => {
            let id = match &parts[0] {
                Value::String(s) => s.trim().to_string(),
                _ => return None,
            };
            let min = parts
                .get(1)
                .map(|raw| min_version(raw, &id, errors))
                .unwrap_or_default();
            (id, min)
        }
        Value::Object(map) => {
            let id = map.get("id").map(scalar_to_string).unwrap_or_default();
            let min = map
                .get("version")
                .map(|raw| min_version(raw, &id, errors))
                .unwrap_or_default();
            (id, min)
        }
        _ => return None,
    };

    if id.is_empty() {
        return None;
    }
    let requirement = Requirement::new(id);
    Some(if min.is_empty() {
        requirement
    } else {
        requirement.at_least(min)
    })
}

/// 派生索引键：小写，空白转为下划线，只保留字母数字、`_` 和 `-`
fn sanitize_name(name: &str, fallback: &str) -> String {
    let sname: String = name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();

    if sname.is_empty() {
        fallback.to_lowercase()
    } else {
        sname
    }
}

fn probe_writable(root: &Path) -> bool {
    std::fs::metadata(root)
        .map(|meta| meta.is_dir() && !meta.permissions().readonly())
        .unwrap_or(false)
}

fn probe_capabilities(
    root: &Path,
    settings: &std::collections::BTreeMap<String, String>,
) -> Capabilities {
    Capabilities {
        has_config_surface: !settings.is_empty()
            || root.join("config").is_dir()
            || root.join("config.yaml").is_file(),
        has_admin_page: root.join("admin").is_dir(),
    }
}
