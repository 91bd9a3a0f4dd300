//! 模块管理器
//!
//! 整合模块引擎的所有组件，提供统一的模块管理接口：
//!
//! ```text
//! 扫描(Registry) → 依赖解析(Resolver) → 强制停用(Lifecycle) → 加载顺序
//!                                   ↑
//! 安装(Installer) ──────── 重新扫描 ─┘
//! ```
//!
//! [`ModuleManager`] 是同步的；[`SharedModuleManager`] 是给异步宿主用的外观，
//! 所有操作通过同一把锁串行执行，并作为整体放到阻塞线程池中运行。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::dependency::{DependencyResolver, Resolution};
use super::external::{NoticeSink, PackageSource, PermissionCheck, RemotePackage, TracingNoticeSink};
use super::hooks::{DispatchReport, HookRegistry};
use super::installer::{InstallOutcome, PackageBundle, PackageInstaller};
use super::lifecycle::{CascadeReport, LifecycleManager};
use super::metadata::{ModuleDefinition, ModuleState};
use super::registry::ModuleRegistry;
use super::version::ModuleVersion;
use crate::core::config::EngineConfig;
use crate::utils::{CoreError, DiscoveryError, Result};

/// 可升级的模块
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCandidate {
    /// 模块 ID
    pub module_id: String,
    /// 已安装版本
    pub installed_version: String,
    /// 仓库中的版本
    pub available_version: String,
    /// 仓库条目
    pub package: RemotePackage,
}

/// 模块管理器
///
/// 负责：
/// - 启动时扫描并应用强制停用
/// - 启用 / 停用 / 删除
/// - 安装后重新扫描
/// - 按权限过滤可用模块、对比仓库中的新版本
pub struct ModuleManager {
    config: EngineConfig,
    lifecycle: LifecycleManager,
    installer: PackageInstaller,
    notices: Arc<dyn NoticeSink>,
    discovery_errors: Vec<DiscoveryError>,
    last_cascade: CascadeReport,
    scanned_at: DateTime<Utc>,
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("roots", &self.config.modules.roots)
            .field("enabled", &self.lifecycle.registry().enabled().len())
            .field("disabled", &self.lifecycle.registry().disabled().len())
            .field("invalid", &self.lifecycle.registry().invalid().len())
            .field("scanned_at", &self.scanned_at)
            .finish()
    }
}

impl ModuleManager {
    /// 启动管理器，强制停用的汇总写入日志
    ///
    /// # Errors
    ///
    /// 配置校验失败
    pub fn start(config: EngineConfig) -> Result<Self> {
        Self::with_notice_sink(config, Arc::new(TracingNoticeSink))
    }

    /// 启动管理器，强制停用的汇总发送到 `notices`
    ///
    /// # Errors
    ///
    /// 配置校验失败
    #[instrument(skip_all, fields(roots = config.modules.roots.len()))]
    pub fn with_notice_sink(config: EngineConfig, notices: Arc<dyn NoticeSink>) -> Result<Self> {
        config.validate()?;

        let installer = PackageInstaller::new(config.loader());
        let lifecycle = LifecycleManager::new(
            ModuleRegistry::new(),
            DependencyResolver::new(config.host_info()),
            config.deletable_roots(),
        );

        let mut manager = Self {
            config,
            lifecycle,
            installer,
            notices,
            discovery_errors: Vec::new(),
            last_cascade: CascadeReport::default(),
            scanned_at: Utc::now(),
        };
        manager.rescan();

        info!(
            enabled = manager.registry().enabled().len(),
            disabled = manager.registry().disabled().len(),
            invalid = manager.registry().invalid().len(),
            "模块管理器已启动"
        );
        Ok(manager)
    }

    /// 重新扫描所有根目录
    ///
    /// 重建注册表、解析依赖并应用强制停用。强制停用的汇总会发送到通知输出。
    pub fn rescan(&mut self) -> &CascadeReport {
        let report = ModuleRegistry::discover(
            &self.config.modules.roots,
            &self.config.loader(),
            self.config.modules.rescue_mode,
        );
        for error in &report.errors {
            warn!(module_id = ?error.module_id(), error = %error, "扫描模块时发现问题");
        }

        let mut lifecycle = LifecycleManager::new(
            report.registry,
            DependencyResolver::new(self.config.host_info()),
            self.config.deletable_roots(),
        );
        let forced = lifecycle.resolution().force_disable.clone();
        let cascade = lifecycle.apply_forced_disables(&forced);
        if let Some(summary) = cascade.summary() {
            self.notices.notice(&summary);
        }

        self.lifecycle = lifecycle;
        self.discovery_errors = report.errors;
        self.scanned_at = report.scanned_at;
        self.last_cascade = cascade;

        debug!(load_order = ?self.lifecycle.load_order_ids(), "模块扫描完成");
        &self.last_cascade
    }

    // ==================== 查询 ====================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        self.lifecycle.registry()
    }

    /// 最近一次依赖解析结果
    pub fn resolution(&self) -> &Resolution {
        self.lifecycle.resolution()
    }

    /// 最近一次扫描收集的错误
    pub fn discovery_errors(&self) -> &[DiscoveryError] {
        &self.discovery_errors
    }

    /// 最近一次扫描时的强制停用结果
    pub fn last_cascade(&self) -> &CascadeReport {
        &self.last_cascade
    }

    pub fn scanned_at(&self) -> DateTime<Utc> {
        self.scanned_at
    }

    /// 获取模块（包括停用和校验失败的模块）
    pub fn get(&self, module_id: &str) -> Option<&ModuleDefinition> {
        self.registry().get_any(module_id)
    }

    pub fn state(&self, module_id: &str) -> Option<ModuleState> {
        self.registry().state(module_id)
    }

    /// 已启用模块的加载顺序
    pub fn load_order(&self) -> Vec<&ModuleDefinition> {
        self.lifecycle.load_order()
    }

    pub fn load_order_ids(&self) -> Vec<String> {
        self.lifecycle.load_order_ids()
    }

    /// 上下文可以使用的已启用模块（按加载顺序）
    pub fn usable_modules(&self, permissions: &dyn PermissionCheck, context_id: &str) -> Vec<&ModuleDefinition> {
        self.load_order()
            .into_iter()
            .filter(|m| permissions.can_use(m.permissions.as_deref(), context_id))
            .collect()
    }

    /// 按加载顺序调用扩展点
    pub fn dispatch<E>(&self, hooks: &HookRegistry<E>, channel: &str, args: &E) -> DispatchReport {
        hooks.dispatch(channel, args, &self.load_order_ids())
    }

    /// 对比仓库中的候选安装包，找出比已安装版本更新的模块
    ///
    /// 只考虑与配置的模块类型一致的候选；同一模块有多个候选时取最高版本。
    ///
    /// # Errors
    ///
    /// 仓库来源获取失败
    pub fn available_updates(&self, source: &dyn PackageSource) -> Result<Vec<UpdateCandidate>> {
        let expected_type = self.config.modules.module_type;
        let mut best: BTreeMap<String, (ModuleVersion, RemotePackage)> = BTreeMap::new();

        for package in source.candidates()? {
            if package.module_type != expected_type {
                continue;
            }
            let Some(installed) = self.get(&package.id) else {
                continue;
            };

            let available = ModuleVersion::parse(&package.version);
            if available <= installed.parsed_version() {
                continue;
            }
            let replace = best
                .get(&package.id)
                .map(|(current, _)| available > *current)
                .unwrap_or(true);
            if replace {
                best.insert(package.id.clone(), (available, package));
            }
        }

        let updates = best
            .into_iter()
            .filter_map(|(module_id, (_, package))| {
                self.get(&module_id).map(|installed| UpdateCandidate {
                    installed_version: installed.version.clone(),
                    available_version: package.version.clone(),
                    module_id,
                    package,
                })
            })
            .collect();
        Ok(updates)
    }

    // ==================== 操作 ====================

    /// 启用模块
    pub fn activate(&mut self, module_id: &str) -> Result<()> {
        self.lifecycle.activate(module_id)
    }

    /// 停用模块
    pub fn deactivate(&mut self, module_id: &str) -> Result<()> {
        self.lifecycle.deactivate(module_id)
    }

    /// 删除模块目录
    pub fn delete(&mut self, module_id: &str) -> Result<ModuleDefinition> {
        self.lifecycle.delete(module_id)
    }

    /// 检查安装包，不修改文件系统
    pub fn inspect(&self, archive_path: &Path) -> Result<PackageBundle> {
        Ok(self.installer.inspect(archive_path, &self.config.install_roots())?)
    }

    /// 安装或升级，成功后重新扫描
    ///
    /// # Errors
    ///
    /// 见 [`crate::utils::InstallError`]
    #[instrument(skip_all, fields(archive = ?archive_path))]
    pub fn install(&mut self, archive_path: &Path) -> Result<InstallOutcome> {
        let outcome = self.installer.install(archive_path, &self.config.install_roots())?;
        self.rescan();
        Ok(outcome)
    }
}

// ==================== 异步外观 ====================

/// 供异步宿主使用的模块管理器
///
/// 每个操作先异步获取锁，再在阻塞线程池中整体执行，
/// 保证安装与启停等操作不会交错。
#[derive(Debug, Clone)]
pub struct SharedModuleManager {
    inner: Arc<Mutex<ModuleManager>>,
}

impl SharedModuleManager {
    pub fn new(manager: ModuleManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    /// 在阻塞线程池中启动管理器
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let manager = tokio::task::spawn_blocking(move || ModuleManager::start(config))
            .await
            .map_err(join_error)??;
        Ok(Self::new(manager))
    }

    /// 在锁内以阻塞方式执行操作
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut ModuleManager) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = Arc::clone(&self.inner).lock_owned().await;
        tokio::task::spawn_blocking(move || operation(&mut *guard))
            .await
            .map_err(join_error)?
    }

    /// 在锁内读取状态
    pub async fn read<T>(&self, reader: impl FnOnce(&ModuleManager) -> T) -> T {
        let guard = self.inner.lock().await;
        reader(&*guard)
    }

    pub async fn rescan(&self) -> Result<CascadeReport> {
        self.run(|manager| Ok(manager.rescan().clone())).await
    }

    pub async fn activate(&self, module_id: impl Into<String>) -> Result<()> {
        let module_id = module_id.into();
        self.run(move |manager| manager.activate(&module_id)).await
    }

    pub async fn deactivate(&self, module_id: impl Into<String>) -> Result<()> {
        let module_id = module_id.into();
        self.run(move |manager| manager.deactivate(&module_id)).await
    }

    pub async fn delete(&self, module_id: impl Into<String>) -> Result<ModuleDefinition> {
        let module_id = module_id.into();
        self.run(move |manager| manager.delete(&module_id)).await
    }

    pub async fn install(&self, archive_path: impl Into<PathBuf>) -> Result<InstallOutcome> {
        let archive_path = archive_path.into();
        self.run(move |manager| manager.install(&archive_path)).await
    }

    pub async fn load_order_ids(&self) -> Vec<String> {
        self.read(ModuleManager::load_order_ids).await
    }
}

fn join_error(e: tokio::task::JoinError) -> CoreError {
    CoreError::Internal(format!("后台任务失败: {}", e))
}
