//! 外部协作者接口
//!
//! 引擎只依赖这些接口的边界行为：
//! - [`PermissionCheck`] - 权限判断谓词
//! - [`NoticeSink`] - 面向运维人员的通知输出
//! - [`PackageSource`] - 远程仓库的候选安装包列表

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::metadata::ModuleType;
use crate::utils::{CoreError, Result};

// ==================== 权限 ====================

/// 权限判断
pub trait PermissionCheck: Send + Sync {
    /// 判断上下文（通常是用户）能否使用需要 `permissions` 的模块
    ///
    /// `permissions` 为 `None` 表示仅超级管理员可用。
    fn can_use(&self, permissions: Option<&str>, context_id: &str) -> bool;
}

/// 静态权限表
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    super_admins: BTreeSet<String>,
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加超级管理员
    pub fn super_admin(mut self, context_id: impl Into<String>) -> Self {
        self.super_admins.insert(context_id.into());
        self
    }

    /// 授予权限
    pub fn grant(mut self, context_id: impl Into<String>, permission: impl Into<String>) -> Self {
        self.grants
            .entry(context_id.into())
            .or_default()
            .insert(permission.into());
        self
    }
}

impl PermissionCheck for StaticPermissions {
    fn can_use(&self, permissions: Option<&str>, context_id: &str) -> bool {
        if self.super_admins.contains(context_id) {
            return true;
        }
        match permissions {
            None => false,
            Some(permission) => self
                .grants
                .get(context_id)
                .is_some_and(|granted| granted.contains(permission)),
        }
    }
}

/// 允许所有操作（命令行与测试使用）
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn can_use(&self, _permissions: Option<&str>, _context_id: &str) -> bool {
        true
    }
}

// ==================== 通知 ====================

/// 通知输出
pub trait NoticeSink: Send + Sync {
    fn notice(&self, message: &str);
}

/// 以 `warn` 级别写入日志
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNoticeSink;

impl NoticeSink for TracingNoticeSink {
    fn notice(&self, message: &str) {
        warn!(target: "chips_modules::notice", "{}", message);
    }
}

/// 把通知保存在内存中
#[derive(Debug, Default)]
pub struct MemoryNoticeSink {
    notices: Mutex<Vec<String>>,
}

impl MemoryNoticeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出所有通知
    pub fn take(&self) -> Vec<String> {
        self.notices
            .lock()
            .map(|mut notices| std::mem::take(&mut *notices))
            .unwrap_or_default()
    }
}

impl NoticeSink for MemoryNoticeSink {
    fn notice(&self, message: &str) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(message.to_string());
        }
    }
}

// ==================== 远程仓库 ====================

/// 远程仓库中的候选安装包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePackage {
    /// 模块 ID
    pub id: String,

    /// 显示名称
    #[serde(default)]
    pub name: String,

    /// 版本
    pub version: String,

    /// 模块类型
    #[serde(default, rename = "type")]
    pub module_type: ModuleType,

    /// 下载地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// 描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 相关度
    #[serde(default)]
    pub score: f64,
}

/// 候选安装包来源
pub trait PackageSource: Send + Sync {
    fn candidates(&self) -> Result<Vec<RemotePackage>>;
}

/// 从 JSON 文件读取仓库清单
///
/// 文件内容可以是安装包数组，也可以是 `{"packages": [...]}`。
#[derive(Debug, Clone)]
pub struct FeedFileSource {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Feed {
    List(Vec<RemotePackage>),
    Wrapped { packages: Vec<RemotePackage> },
}

impl FeedFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PackageSource for FeedFileSource {
    fn candidates(&self) -> Result<Vec<RemotePackage>> {
        let content = std::fs::read_to_string(&self.path)?;
        let feed: Feed = serde_json::from_str(&content)?;
        let packages = match feed {
            Feed::List(packages) | Feed::Wrapped { packages } => packages,
        };
        debug!(path = ?self.path, count = packages.len(), "读取仓库清单");
        Ok(packages)
    }
}

/// 带过期时间的缓存包装
///
/// 缓存过期后重新获取；获取失败时如果有旧数据则继续使用旧数据。
#[derive(Debug)]
pub struct CachedSource<S> {
    inner: S,
    ttl: Duration,
    cache: Mutex<Option<(DateTime<Utc>, Vec<RemotePackage>)>>,
}

impl<S: PackageSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// 丢弃缓存
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }
}

impl<S: PackageSource> PackageSource for CachedSource<S> {
    fn candidates(&self) -> Result<Vec<RemotePackage>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| CoreError::Internal("仓库缓存锁已损坏".to_string()))?;

        let now = Utc::now();
        if let Some((fetched_at, packages)) = cache.as_ref() {
            if now - *fetched_at < self.ttl {
                return Ok(packages.clone());
            }
        }

        match self.inner.candidates() {
            Ok(packages) => {
                *cache = Some((now, packages.clone()));
                Ok(packages)
            }
            Err(e) => match cache.as_ref() {
                Some((_, stale)) => {
                    warn!(error = %e, "刷新仓库清单失败，继续使用缓存");
                    Ok(stale.clone())
                }
                None => Err(e),
            },
        }
    }
}
