//! 安装包安装器
//!
//! 把 zip 安装包安装或升级到模块根目录：
//!
//! 1. 打开安装包，确定布局（单一顶层目录，或平铺文件）并找到描述文件
//! 2. 只把描述文件解压到临时目录，用加载器做沙箱校验
//! 3. 目标目录已存在时比较版本，只接受严格更新的版本
//! 4. 完整解压到目标根目录下的暂存目录，再通过重命名替换目标目录
//!
//! 任何一步失败时目标目录要么从未创建，要么仍是原来的完整版本。
//! 源安装包在每次尝试结束后都会被删除，无论成功与否。

use std::ffi::OsStr;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::loader::DefinitionLoader;
use super::metadata::ModuleDefinition;
use super::parser::DESCRIPTOR_FILENAMES;
use super::version::ModuleVersion;
use crate::utils::InstallError;

/// 打包工具附带的元数据目录，解压时忽略
const JUNK_TOP_LEVEL: &str = "__MACOSX";

type InstallResult<T> = std::result::Result<T, InstallError>;

/// 安装结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// 新安装的模块
    New {
        module_id: String,
        version: String,
        path: PathBuf,
    },
    /// 升级已有模块
    Upgrade {
        module_id: String,
        previous_version: String,
        version: String,
        path: PathBuf,
    },
}

impl InstallOutcome {
    pub fn module_id(&self) -> &str {
        match self {
            InstallOutcome::New { module_id, .. } | InstallOutcome::Upgrade { module_id, .. } => module_id,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            InstallOutcome::New { path, .. } | InstallOutcome::Upgrade { path, .. } => path,
        }
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self, InstallOutcome::Upgrade { .. })
    }
}

/// 安装包被拒绝的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// 沙箱校验失败
    Invalid(Vec<String>),
    /// 版本不比已安装版本新
    NotNewer { installed_version: String },
}

/// 安装包的判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleStatus {
    /// 新模块
    New,
    /// 可以升级
    Upgrade { installed_version: String },
    /// 拒绝安装
    Rejected(Rejection),
}

/// 待安装的安装包
///
/// `definition.root` 是安装后将占用的目录，`current_version` 是已安装的版本（如果有）。
#[derive(Debug, Clone)]
pub struct PackageBundle {
    /// 沙箱中加载的模块定义
    pub definition: ModuleDefinition,
    /// 目标目录
    pub destination: PathBuf,
    /// 判定结果
    pub status: BundleStatus,
}

impl PackageBundle {
    pub fn module_id(&self) -> &str {
        &self.definition.id
    }

    pub fn is_installable(&self) -> bool {
        !matches!(self.status, BundleStatus::Rejected(_))
    }

    /// 被拒绝时转换为对应的安装错误
    fn rejection_error(&self) -> Option<InstallError> {
        match &self.status {
            BundleStatus::Rejected(Rejection::Invalid(errors)) => Some(InstallError::Validation {
                module_id: self.definition.id.clone(),
                errors: errors.clone(),
            }),
            BundleStatus::Rejected(Rejection::NotNewer { installed_version }) => Some(InstallError::NotNewer {
                module_id: self.definition.id.clone(),
                installed: installed_version.clone(),
                candidate: self.definition.version.clone(),
            }),
            _ => None,
        }
    }
}

/// 安装包中的一个条目
#[derive(Debug, Clone)]
struct ArchiveEntry {
    index: usize,
    path: PathBuf,
    is_dir: bool,
}

/// 安装包布局
#[derive(Debug)]
struct ArchiveLayout {
    /// 单一顶层目录（如果有）
    prefix: Option<PathBuf>,
    /// 模块目录名
    module_name: String,
    /// 描述文件条目
    descriptor: ArchiveEntry,
    /// 描述文件名
    descriptor_name: &'static str,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveLayout {
    /// 条目相对于模块根目录的路径
    fn relative<'a>(&self, entry: &'a ArchiveEntry) -> Option<&'a Path> {
        match &self.prefix {
            Some(prefix) => entry.path.strip_prefix(prefix).ok(),
            None => Some(entry.path.as_path()),
        }
    }

    fn has_dir(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| {
            let Some(rel) = self.relative(entry) else {
                return false;
            };
            let mut components = rel.components();
            components.next().is_some_and(|first| first.as_os_str() == name)
                && (entry.is_dir || components.next().is_some())
        })
    }

    fn has_file(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| !entry.is_dir && self.relative(entry) == Some(Path::new(name)))
    }
}

fn entry_depth(path: &Path) -> usize {
    path.components().count()
}

/// 安装包安装器
#[derive(Debug, Clone, Default)]
pub struct PackageInstaller {
    loader: DefinitionLoader,
}

impl PackageInstaller {
    /// 创建安装器，使用给定的加载器做沙箱校验
    pub fn new(loader: DefinitionLoader) -> Self {
        Self { loader }
    }

    /// 检查安装包，不修改任何安装目录，也不删除安装包
    ///
    /// # Arguments
    ///
    /// * `archive_path` - 安装包路径
    /// * `roots` - 按优先级排列的模块根目录，新模块安装到第一个根目录
    ///
    /// # Errors
    ///
    /// 安装包损坏、为空、缺少描述文件、目录名不合法，或已安装模块的版本无法读取
    pub fn inspect(&self, archive_path: &Path, roots: &[PathBuf]) -> InstallResult<PackageBundle> {
        let mut archive = open_archive(archive_path)?;
        let layout = analyze_layout(&mut archive, archive_path)?;
        self.evaluate(&mut archive, &layout, roots)
    }

    /// 安装或升级
    ///
    /// 无论结果如何，安装包文件都会被删除。
    ///
    /// # Errors
    ///
    /// 见 [`InstallError`]；失败时不会留下半写入的模块目录
    pub fn install(&self, archive_path: &Path, roots: &[PathBuf]) -> InstallResult<InstallOutcome> {
        let result = self.install_inner(archive_path, roots);

        match std::fs::remove_file(archive_path) {
            Ok(()) => debug!(archive = ?archive_path, "安装包已删除"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(archive = ?archive_path, error = %e, "无法删除安装包"),
        }

        match &result {
            Ok(outcome) => info!(module_id = %outcome.module_id(), upgrade = outcome.is_upgrade(), "模块安装完成"),
            Err(e) => warn!(archive = ?archive_path, error = %e, "模块安装失败"),
        }
        result
    }

    fn install_inner(&self, archive_path: &Path, roots: &[PathBuf]) -> InstallResult<InstallOutcome> {
        let mut archive = open_archive(archive_path)?;
        let layout = analyze_layout(&mut archive, archive_path)?;
        let bundle = self.evaluate(&mut archive, &layout, roots)?;

        if let Some(error) = bundle.rejection_error() {
            return Err(error);
        }

        let destination = bundle.destination.clone();
        let target_root = destination
            .parent()
            .map(Path::to_path_buf)
            .ok_or(InstallError::NoTargetRoot)?;
        std::fs::create_dir_all(&target_root)?;

        // 暂存目录必须与目标目录在同一文件系统上
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&target_root)?;
        let staged = staging.path().join(&layout.module_name);
        extract_all(&mut archive, &layout, &staged)?;
        debug!(module_id = %bundle.module_id(), staging = ?staged, "安装包已解压到暂存目录");

        let module_id = bundle.definition.id.clone();
        let version = bundle.definition.version.clone();

        match bundle.status {
            BundleStatus::New => {
                std::fs::rename(&staged, &destination)?;
                Ok(InstallOutcome::New {
                    module_id,
                    version,
                    path: destination,
                })
            }
            BundleStatus::Upgrade { installed_version } => {
                swap_in(&staged, &destination, &target_root)?;
                Ok(InstallOutcome::Upgrade {
                    module_id,
                    previous_version: installed_version,
                    version,
                    path: destination,
                })
            }
            BundleStatus::Rejected(_) => Err(InstallError::Extraction("安装包已被拒绝".to_string())),
        }
    }

    /// 沙箱校验并判定安装包
    fn evaluate(
        &self,
        archive: &mut ZipArchive<File>,
        layout: &ArchiveLayout,
        roots: &[PathBuf],
    ) -> InstallResult<PackageBundle> {
        let first_root = roots.first().ok_or(InstallError::NoTargetRoot)?;
        let existing = self.installed_copy(&layout.module_name, roots)?;
        let destination = existing
            .as_ref()
            .map(|(dir, _)| dir.clone())
            .unwrap_or_else(|| first_root.join(&layout.module_name));

        let mut definition = self.sandbox_load(archive, layout)?;
        definition.root = destination.clone();
        definition.writable = false;
        definition.current_version = None;
        definition.capabilities.has_admin_page = layout.has_dir("admin");
        definition.capabilities.has_config_surface = !definition.settings.is_empty()
            || layout.has_dir("config")
            || layout.has_file("config.yaml");

        if !definition.is_valid() {
            let status = BundleStatus::Rejected(Rejection::Invalid(definition.validation_errors.clone()));
            return Ok(PackageBundle {
                definition,
                destination,
                status,
            });
        }

        let status = match existing {
            None => BundleStatus::New,
            Some((_, installed_version)) => {
                definition.current_version = Some(installed_version.clone());
                if definition.parsed_version() > ModuleVersion::parse(&installed_version) {
                    BundleStatus::Upgrade { installed_version }
                } else {
                    BundleStatus::Rejected(Rejection::NotNewer { installed_version })
                }
            }
        };

        Ok(PackageBundle {
            definition,
            destination,
            status,
        })
    }

    /// 只解压描述文件到临时目录并加载
    fn sandbox_load(&self, archive: &mut ZipArchive<File>, layout: &ArchiveLayout) -> InstallResult<ModuleDefinition> {
        let sandbox = tempfile::Builder::new().prefix("chips-sandbox-").tempdir()?;
        let module_dir = sandbox.path().join(&layout.module_name);
        std::fs::create_dir_all(&module_dir)?;

        let mut source = archive
            .by_index(layout.descriptor.index)
            .map_err(|e| InstallError::Extraction(e.to_string()))?;
        let mut target = File::create(module_dir.join(layout.descriptor_name))?;
        std::io::copy(&mut source, &mut target)?;
        drop(target);

        let definition = self.loader.load_dir(&layout.module_name, &module_dir).map_err(|e| {
            InstallError::Validation {
                module_id: layout.module_name.clone(),
                errors: vec![e.to_string()],
            }
        })?;
        debug!(module_id = %definition.id, version = %definition.version, "沙箱校验完成");
        Ok(definition)
    }

    /// 注册表实际使用的已安装副本
    ///
    /// 多个根目录中都有该模块时，与扫描规则一致：严格更高的版本胜出，
    /// 版本相同时保留先出现的副本。只有所有副本都无法读取时才返回错误。
    fn installed_copy(&self, module_id: &str, roots: &[PathBuf]) -> InstallResult<Option<(PathBuf, String)>> {
        let mut winner: Option<(PathBuf, String)> = None;
        let mut unreadable = None;

        for dir in roots.iter().map(|root| root.join(module_id)).filter(|dir| dir.is_dir()) {
            let version = match self.installed_version(module_id, &dir) {
                Ok(version) => version,
                Err(e) => {
                    warn!(module_id, path = ?dir, error = %e, "已安装副本无法读取");
                    unreadable.get_or_insert(e);
                    continue;
                }
            };

            let shadowed = winner
                .as_ref()
                .is_some_and(|(_, best)| ModuleVersion::parse(&version) <= ModuleVersion::parse(best));
            if shadowed {
                debug!(module_id, shadowed = ?dir, "忽略被遮蔽的副本");
            } else {
                winner = Some((dir, version));
            }
        }

        match (winner, unreadable) {
            (Some(copy), _) => Ok(Some(copy)),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(None),
        }
    }

    fn installed_version(&self, module_id: &str, dir: &Path) -> InstallResult<String> {
        let installed = self
            .loader
            .load_dir(module_id, dir)
            .map_err(|e| InstallError::InstalledUnreadable {
                module_id: module_id.to_string(),
                reason: e.to_string(),
            })?;

        if installed.version.is_empty() {
            return Err(InstallError::InstalledUnreadable {
                module_id: module_id.to_string(),
                reason: "描述文件中没有版本号".to_string(),
            });
        }
        Ok(installed.version)
    }
}

fn open_archive(archive_path: &Path) -> InstallResult<ZipArchive<File>> {
    let file = File::open(archive_path)?;
    ZipArchive::new(file).map_err(|e| InstallError::Corrupt {
        archive: archive_path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// 读取条目并确定布局
fn analyze_layout(archive: &mut ZipArchive<File>, archive_path: &Path) -> InstallResult<ArchiveLayout> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index(index).map_err(|e| InstallError::Corrupt {
            archive: archive_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let path = file
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| InstallError::Corrupt {
                archive: archive_path.to_path_buf(),
                reason: format!("条目路径不安全: '{}'", file.name()),
            })?;

        if path.components().next().map(Component::as_os_str) == Some(OsStr::new(JUNK_TOP_LEVEL)) {
            continue;
        }
        entries.push(ArchiveEntry {
            index,
            path,
            is_dir: file.is_dir(),
        });
    }

    if entries.is_empty() {
        return Err(InstallError::Empty(archive_path.to_path_buf()));
    }

    let prefix = single_top_level_dir(&entries);
    let (descriptor, descriptor_name) = DESCRIPTOR_FILENAMES
        .iter()
        .find_map(|name| {
            let expected = match &prefix {
                Some(prefix) => prefix.join(name),
                None => PathBuf::from(name),
            };
            entries
                .iter()
                .find(|entry| !entry.is_dir && entry.path == expected)
                .map(|entry| (entry.clone(), *name))
        })
        .ok_or_else(|| InstallError::DescriptorMissing(archive_path.to_path_buf()))?;

    let module_name = match &prefix {
        Some(prefix) => prefix.to_str().map(str::to_string),
        None => archive_path
            .file_stem()
            .and_then(OsStr::to_str)
            .map(str::to_string),
    }
    .unwrap_or_default();

    if !is_valid_module_name(&module_name)? {
        return Err(InstallError::InvalidDestination(module_name));
    }

    debug!(
        archive = ?archive_path,
        module_name = %module_name,
        wrapped = prefix.is_some(),
        entries = entries.len(),
        "安装包布局已确定"
    );

    Ok(ArchiveLayout {
        prefix,
        module_name,
        descriptor,
        descriptor_name,
        entries,
    })
}

/// 所有条目都位于同一个顶层目录下时返回该目录
fn single_top_level_dir(entries: &[ArchiveEntry]) -> Option<PathBuf> {
    let mut top: Option<&OsStr> = None;
    for entry in entries {
        let first = entry.path.components().next()?.as_os_str();
        if !entry.is_dir && entry_depth(&entry.path) == 1 {
            return None;
        }
        match top {
            None => top = Some(first),
            Some(existing) if existing != first => return None,
            Some(_) => {}
        }
    }
    top.map(PathBuf::from)
}

fn is_valid_module_name(name: &str) -> InstallResult<bool> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$"))
        .as_ref()
        .map_err(|e| InstallError::InvalidDestination(format!("{}: {}", name, e)))?;
    Ok(pattern.is_match(name))
}

/// 完整解压到目标目录
fn extract_all(archive: &mut ZipArchive<File>, layout: &ArchiveLayout, dest: &Path) -> InstallResult<()> {
    std::fs::create_dir_all(dest)?;
    for entry in &layout.entries {
        let Some(rel) = layout.relative(entry) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        let out = dest.join(rel);
        if entry.is_dir {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut source = archive
            .by_index(entry.index)
            .map_err(|e| InstallError::Extraction(format!("{:?}: {}", rel, e)))?;
        let mut target = File::create(&out)?;
        std::io::copy(&mut source, &mut target)
            .map_err(|e| InstallError::Extraction(format!("{:?}: {}", rel, e)))?;
    }
    Ok(())
}

/// 用暂存目录替换已有的目标目录
///
/// 旧目录先重命名为隐藏的备份目录，新目录就位后再删除备份；
/// 新目录无法就位时把旧目录移回原处。
fn swap_in(staged: &Path, destination: &Path, target_root: &Path) -> InstallResult<()> {
    let name = destination
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| InstallError::InvalidDestination(destination.display().to_string()))?;
    let backup = target_root.join(format!(".backup-{}-{}", name, Utc::now().timestamp_millis()));

    std::fs::rename(destination, &backup)?;
    if let Err(e) = std::fs::rename(staged, destination) {
        warn!(destination = ?destination, error = %e, "新版本无法就位，恢复旧版本");
        if let Err(restore) = std::fs::rename(&backup, destination) {
            warn!(backup = ?backup, error = %restore, "恢复旧版本失败，备份目录已保留");
        }
        return Err(e.into());
    }

    if let Err(e) = std::fs::remove_dir_all(&backup) {
        warn!(backup = ?backup, error = %e, "无法删除旧版本备份");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::ModuleType;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn build_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, content) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    fn descriptor(version: &str) -> String {
        format!("name: Gallery\ndescription: Photo gallery\nauthor: Chips Team\nversion: \"{version}\"\n")
    }

    fn gallery_archive(dir: &Path, version: &str, extra: &str) -> PathBuf {
        let path = dir.join(format!("gallery-{version}.zip"));
        let yaml = descriptor(version);
        build_archive(
            &path,
            &[
                ("gallery/", ""),
                ("gallery/module.yaml", yaml.as_str()),
                ("gallery/admin/index.html", "<h1>admin</h1>"),
                (extra, "payload"),
            ],
        );
        path
    }

    fn leftover_hidden_dirs(root: &Path) -> Vec<String> {
        std::fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with('.'))
            .collect()
    }

    #[test]
    fn test_install_new_wrapped_archive() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let archive = gallery_archive(downloads.path(), "1.0.0", "gallery/lib/v1.txt");

        let outcome = PackageInstaller::default()
            .install(&archive, &[modules.path().to_path_buf()])
            .unwrap();

        let dest = modules.path().join("gallery");
        assert_eq!(
            outcome,
            InstallOutcome::New {
                module_id: "gallery".to_string(),
                version: "1.0.0".to_string(),
                path: dest.clone(),
            }
        );
        assert!(dest.join("module.yaml").is_file());
        assert!(dest.join("lib/v1.txt").is_file());
        assert!(!archive.exists());
        assert!(leftover_hidden_dirs(modules.path()).is_empty());
    }

    #[test]
    fn test_install_flat_archive_uses_file_stem() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let archive = downloads.path().join("albums.zip");
        build_archive(
            &archive,
            &[
                ("module.yaml", descriptor("0.1").as_str()),
                ("src/main.txt", "x"),
                ("__MACOSX/._module.yaml", "junk"),
            ],
        );

        let outcome = PackageInstaller::default()
            .install(&archive, &[modules.path().to_path_buf()])
            .unwrap();
        assert_eq!(outcome.module_id(), "albums");
        assert!(modules.path().join("albums/src/main.txt").is_file());
        assert!(!modules.path().join("albums/__MACOSX").exists());
    }

    #[test]
    fn test_upgrade_round_trip() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let roots = vec![modules.path().to_path_buf()];
        let installer = PackageInstaller::default();

        let v1 = gallery_archive(downloads.path(), "1.0.0", "gallery/lib/v1.txt");
        installer.install(&v1, &roots).unwrap();

        let v2 = gallery_archive(downloads.path(), "1.1.0", "gallery/lib/v2.txt");
        let outcome = installer.install(&v2, &roots).unwrap();
        assert!(outcome.is_upgrade());
        assert!(matches!(
            &outcome,
            InstallOutcome::Upgrade { previous_version, version, .. }
                if previous_version == "1.0.0" && version == "1.1.0"
        ));

        let dest = modules.path().join("gallery");
        assert!(!dest.join("lib/v1.txt").exists());
        assert!(dest.join("lib/v2.txt").is_file());
        assert!(std::fs::read_to_string(dest.join("module.yaml")).unwrap().contains("1.1.0"));

        let again = gallery_archive(downloads.path(), "1.1.0", "gallery/lib/v3.txt");
        let err = installer.install(&again, &roots).unwrap_err();
        assert!(matches!(
            &err,
            InstallError::NotNewer { installed, candidate, .. } if installed == "1.1.0" && candidate == "1.1.0"
        ));
        assert!(!again.exists());
        assert!(!dest.join("lib/v3.txt").exists());
        assert!(leftover_hidden_dirs(modules.path()).is_empty());
    }

    #[test]
    fn test_downgrade_is_rejected() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let roots = vec![modules.path().to_path_buf()];
        let installer = PackageInstaller::default();

        installer
            .install(&gallery_archive(downloads.path(), "2.0.0", "gallery/a.txt"), &roots)
            .unwrap();
        let err = installer
            .install(&gallery_archive(downloads.path(), "2.0.0-beta", "gallery/b.txt"), &roots)
            .unwrap_err();
        assert!(matches!(err, InstallError::NotNewer { .. }));
    }

    #[test]
    fn test_missing_descriptor() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let archive = downloads.path().join("broken.zip");
        build_archive(&archive, &[("broken/", ""), ("broken/readme.txt", "hello")]);

        let err = PackageInstaller::default()
            .install(&archive, &[modules.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, InstallError::DescriptorMissing(_)));
        assert!(!archive.exists());
        assert!(!modules.path().join("broken").exists());
    }

    #[test]
    fn test_descriptor_in_nested_directory_is_not_found() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let archive = downloads.path().join("deep.zip");
        build_archive(&archive, &[("deep/inner/module.yaml", descriptor("1.0").as_str())]);

        let err = PackageInstaller::default()
            .install(&archive, &[modules.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, InstallError::DescriptorMissing(_)));
    }

    #[test]
    fn test_corrupt_archive() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let archive = downloads.path().join("corrupt.zip");
        std::fs::write(&archive, b"this is not a zip file").unwrap();

        let err = PackageInstaller::default()
            .install(&archive, &[modules.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, InstallError::Corrupt { .. }));
        assert!(!archive.exists());
        assert_eq!(std::fs::read_dir(modules.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_archive() {
        let downloads = TempDir::new().unwrap();
        let archive = downloads.path().join("empty.zip");
        build_archive(&archive, &[]);

        let err = PackageInstaller::default()
            .install(&archive, &[downloads.path().join("modules")])
            .unwrap_err();
        assert!(matches!(err, InstallError::Empty(_)));
    }

    #[test]
    fn test_invalid_descriptor_is_rejected() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let archive = downloads.path().join("half.zip");
        build_archive(&archive, &[("half/module.yaml", "name: Half\nversion: \"1.0\"\n")]);

        let err = PackageInstaller::default()
            .install(&archive, &[modules.path().to_path_buf()])
            .unwrap_err();
        match err {
            InstallError::Validation { module_id, errors } => {
                assert_eq!(module_id, "half");
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!modules.path().join("half").exists());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let archive = downloads.path().join("dark.zip");
        build_archive(
            &archive,
            &[("dark/module.yaml", format!("{}type: theme\n", descriptor("1.0")).as_str())],
        );

        let installer = PackageInstaller::new(DefinitionLoader::new(ModuleType::Plugin));
        let err = installer
            .install(&archive, &[modules.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, InstallError::Validation { .. }));
    }

    #[test]
    fn test_no_target_root() {
        let downloads = TempDir::new().unwrap();
        let archive = gallery_archive(downloads.path(), "1.0", "gallery/x.txt");

        let err = PackageInstaller::default().install(&archive, &[]).unwrap_err();
        assert!(matches!(err, InstallError::NoTargetRoot));
        assert!(!archive.exists());
    }

    #[test]
    fn test_invalid_destination_name() {
        let downloads = TempDir::new().unwrap();
        let archive = downloads.path().join("bad name!.zip");
        build_archive(&archive, &[("module.yaml", descriptor("1.0").as_str())]);

        let err = PackageInstaller::default()
            .install(&archive, &[downloads.path().join("modules")])
            .unwrap_err();
        assert!(matches!(err, InstallError::InvalidDestination(_)));
    }

    #[test]
    fn test_inspect_does_not_touch_anything() {
        let downloads = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        let roots = vec![modules.path().to_path_buf()];
        let installer = PackageInstaller::default();
        installer
            .install(&gallery_archive(downloads.path(), "1.0.0", "gallery/a.txt"), &roots)
            .unwrap();

        let archive = gallery_archive(downloads.path(), "1.2.0", "gallery/b.txt");
        let bundle = installer.inspect(&archive, &roots).unwrap();

        assert!(archive.exists());
        assert!(bundle.is_installable());
        assert_eq!(
            bundle.status,
            BundleStatus::Upgrade {
                installed_version: "1.0.0".to_string()
            }
        );
        assert_eq!(bundle.definition.current_version.as_deref(), Some("1.0.0"));
        assert_eq!(bundle.destination, modules.path().join("gallery"));
        assert!(bundle.definition.capabilities.has_admin_page);
        assert!(!modules.path().join("gallery/b.txt").exists());
    }

    #[test]
    fn test_module_name_pattern() {
        assert!(is_valid_module_name("gallery-2.x").unwrap());
        assert!(!is_valid_module_name(".staging-gallery").unwrap());
        assert!(!is_valid_module_name("bad name").unwrap());
        assert!(!is_valid_module_name("").unwrap());
    }

    #[test]
    fn test_upgrade_targets_highest_installed_copy() {
        let downloads = TempDir::new().unwrap();
        let primary = TempDir::new().unwrap();
        let secondary = TempDir::new().unwrap();
        let installer = PackageInstaller::default();

        installer
            .install(
                &gallery_archive(downloads.path(), "1.0", "gallery/old.txt"),
                &[primary.path().to_path_buf()],
            )
            .unwrap();
        installer
            .install(
                &gallery_archive(downloads.path(), "2.0", "gallery/live.txt"),
                &[secondary.path().to_path_buf()],
            )
            .unwrap();
        let roots = vec![primary.path().to_path_buf(), secondary.path().to_path_buf()];

        // 1.5 比被遮蔽的 1.0 新，但不比正在使用的 2.0 新
        let err = installer
            .install(&gallery_archive(downloads.path(), "1.5", "gallery/mid.txt"), &roots)
            .unwrap_err();
        assert!(matches!(
            &err,
            InstallError::NotNewer { installed, candidate, .. } if installed == "2.0" && candidate == "1.5"
        ));
        assert!(primary.path().join("gallery/old.txt").is_file());

        let outcome = installer
            .install(&gallery_archive(downloads.path(), "2.1", "gallery/new.txt"), &roots)
            .unwrap();
        assert!(matches!(
            &outcome,
            InstallOutcome::Upgrade { previous_version, .. } if previous_version == "2.0"
        ));
        assert_eq!(outcome.path(), secondary.path().join("gallery"));
        assert!(secondary.path().join("gallery/new.txt").is_file());
        assert!(primary.path().join("gallery/old.txt").is_file());
    }

    #[test]
    fn test_equal_installed_copies_keep_first_root() {
        let downloads = TempDir::new().unwrap();
        let primary = TempDir::new().unwrap();
        let secondary = TempDir::new().unwrap();
        let installer = PackageInstaller::default();

        for root in [primary.path(), secondary.path()] {
            installer
                .install(
                    &gallery_archive(downloads.path(), "1.0", "gallery/a.txt"),
                    &[root.to_path_buf()],
                )
                .unwrap();
        }

        let roots = vec![primary.path().to_path_buf(), secondary.path().to_path_buf()];
        let bundle = installer
            .inspect(&gallery_archive(downloads.path(), "1.1", "gallery/b.txt"), &roots)
            .unwrap();
        assert_eq!(bundle.destination, primary.path().join("gallery"));
    }

    #[test]
    fn test_upgrade_in_lower_priority_root() {
        let downloads = TempDir::new().unwrap();
        let primary = TempDir::new().unwrap();
        let secondary = TempDir::new().unwrap();
        let installer = PackageInstaller::default();

        installer
            .install(
                &gallery_archive(downloads.path(), "1.0", "gallery/a.txt"),
                &[secondary.path().to_path_buf()],
            )
            .unwrap();

        let roots = vec![primary.path().to_path_buf(), secondary.path().to_path_buf()];
        let outcome = installer
            .install(&gallery_archive(downloads.path(), "1.1", "gallery/b.txt"), &roots)
            .unwrap();

        assert!(outcome.is_upgrade());
        assert_eq!(outcome.path(), secondary.path().join("gallery"));
        assert!(!primary.path().join("gallery").exists());
    }
}
