//! 模块描述文件解析器
//!
//! 负责把描述文件 (module.yaml / module.json) 解析为扁平的键值表
//! [`DescriptorMap`]。加载器的校验规则只针对键值表定义，与序列化格式无关。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::utils::{CoreError, Result};

/// 首选的描述文件名
pub const DESCRIPTOR_FILENAME: &str = "module.yaml";

/// 按查找顺序排列的描述文件名
pub const DESCRIPTOR_FILENAMES: [&str; 2] = [DESCRIPTOR_FILENAME, "module.json"];

/// 扁平键值表
pub type DescriptorMap = BTreeMap<String, Value>;

/// 模块描述文件解析器
#[derive(Debug, Clone, Default)]
pub struct ModuleParser;

impl ModuleParser {
    /// 在模块目录中查找描述文件
    ///
    /// # Returns
    ///
    /// 找到的第一个描述文件路径，目录中没有描述文件时返回 `None`
    pub fn find_descriptor(module_dir: &Path) -> Option<PathBuf> {
        DESCRIPTOR_FILENAMES
            .iter()
            .map(|name| module_dir.join(name))
            .find(|path| path.is_file())
    }

    /// 从文件解析描述文件
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 内容不是键值表时返回 `InvalidMetadata`
    pub fn parse_file(path: &Path) -> Result<DescriptorMap> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::parse_json(&content)
        } else {
            Self::parse_yaml(&content)
        }
    }

    /// 从 YAML 字符串解析
    pub fn parse_yaml(content: &str) -> Result<DescriptorMap> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::into_map(value)
    }

    /// 从 JSON 字符串解析
    pub fn parse_json(content: &str) -> Result<DescriptorMap> {
        let value: Value = serde_json::from_str(content)?;
        Self::into_map(value)
    }

    fn into_map(value: Value) -> Result<DescriptorMap> {
        match value {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| (key.trim().to_lowercase(), value))
                .collect()),
            Value::Null => Err(CoreError::InvalidMetadata("描述文件为空".to_string())),
            other => Err(CoreError::InvalidMetadata(format!(
                "描述文件的顶层必须是键值表，实际为: {}",
                type_name(&other)
            ))),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
