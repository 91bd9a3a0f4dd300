//! 安装器与模块管理器集成测试

mod common;

use std::sync::Arc;

use chips_modules::module::external::{FeedFileSource, MemoryNoticeSink};
use chips_modules::module::installer::BundleStatus;
use chips_modules::{
    CoreError, EngineConfig, InstallError, InstallOutcome, ModuleManager, ModuleState,
    PackageInstaller, SharedModuleManager,
};
use common::{build_archive, child_dirs, module_archive, write_module};
use tempfile::TempDir;

fn config(root: &std::path::Path) -> EngineConfig {
    EngineConfig::builder().root(root).host("core", "2.0").build()
}

/// 安装 1.0.0，升级到 1.1.0，再次使用 1.1.0 升级被拒绝
#[test]
fn test_install_upgrade_round_trip() {
    let downloads = TempDir::new().unwrap();
    let modules = TempDir::new().unwrap();
    let roots = vec![modules.path().to_path_buf()];
    let installer = PackageInstaller::default();

    let first = module_archive(downloads.path(), "gallery", "1.0.0", "v1");
    let outcome = installer.install(&first, &roots).unwrap();
    assert!(matches!(outcome, InstallOutcome::New { ref version, .. } if version == "1.0.0"));
    assert!(!first.exists());

    let second = module_archive(downloads.path(), "gallery", "1.1.0", "v2");
    let outcome = installer.install(&second, &roots).unwrap();
    match outcome {
        InstallOutcome::Upgrade { previous_version, version, .. } => {
            assert_eq!(previous_version, "1.0.0");
            assert_eq!(version, "1.1.0");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(child_dirs(modules.path()), vec!["gallery"]);
    assert_eq!(
        std::fs::read_to_string(modules.path().join("gallery/payload.txt")).unwrap(),
        "v2"
    );

    let again = module_archive(downloads.path(), "gallery", "1.1.0", "v3");
    let err = installer.install(&again, &roots).unwrap_err();
    match err {
        InstallError::NotNewer { installed, candidate, .. } => {
            assert_eq!(installed, "1.1.0");
            assert_eq!(candidate, "1.1.0");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!again.exists());
    assert_eq!(
        std::fs::read_to_string(modules.path().join("gallery/payload.txt")).unwrap(),
        "v2"
    );
}

/// 没有描述文件的安装包：不创建目录，删除安装包
#[test]
fn test_corrupt_archive_leaves_no_directory() {
    let downloads = TempDir::new().unwrap();
    let modules = TempDir::new().unwrap();

    let archive = build_archive(
        &downloads.path().join("junk.zip"),
        &[("junk/", ""), ("junk/readme.txt", "no descriptor here")],
    );
    let err = PackageInstaller::default()
        .install(&archive, &[modules.path().to_path_buf()])
        .unwrap_err();

    assert!(matches!(err, InstallError::DescriptorMissing(_)));
    assert!(!archive.exists());
    assert!(child_dirs(modules.path()).is_empty());

    let garbage = downloads.path().join("garbage.zip");
    std::fs::write(&garbage, b"definitely not a zip").unwrap();
    let err = PackageInstaller::default()
        .install(&garbage, &[modules.path().to_path_buf()])
        .unwrap_err();
    assert!(matches!(err, InstallError::Corrupt { .. }));
    assert!(!garbage.exists());
    assert!(child_dirs(modules.path()).is_empty());
}

/// 管理器安装后重新扫描，新模块立即可用
#[test]
fn test_manager_install_then_rescan() {
    let downloads = TempDir::new().unwrap();
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "blog", "1.0", "");

    let mut manager = ModuleManager::start(config(modules.path())).unwrap();
    assert_eq!(manager.load_order_ids(), vec!["blog"]);

    let archive = module_archive(downloads.path(), "gallery", "2.0", "payload");
    let bundle = manager.inspect(&archive).unwrap();
    assert_eq!(bundle.status, BundleStatus::New);
    assert!(archive.exists());

    let outcome = manager.install(&archive).unwrap();
    assert!(!outcome.is_upgrade());
    assert_eq!(manager.state("gallery"), Some(ModuleState::Enabled));
    assert_eq!(manager.load_order_ids(), vec!["blog", "gallery"]);

    let stale = module_archive(downloads.path(), "gallery", "1.0", "old");
    let err = manager.install(&stale).unwrap_err();
    assert!(matches!(err, CoreError::Install(InstallError::NotNewer { .. })));
    assert_eq!(err.error_code(), chips_modules::error_code::INSTALL_NOT_NEWER);
}

/// 多个根目录中都有同一模块时，升级针对注册表正在使用的副本
#[test]
fn test_manager_upgrade_targets_live_copy() {
    let downloads = TempDir::new().unwrap();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let shadowed = write_module(first.path(), "x", "1.0", "");
    let live = write_module(second.path(), "x", "2.0", "");

    let config = EngineConfig::builder()
        .root(first.path())
        .root(second.path())
        .host("core", "2.0")
        .build();
    let mut manager = ModuleManager::start(config).unwrap();
    assert_eq!(manager.get("x").unwrap().version, "2.0");

    let err = manager
        .install(&module_archive(downloads.path(), "x", "1.5", "mid"))
        .unwrap_err();
    match err {
        CoreError::Install(InstallError::NotNewer { installed, .. }) => assert_eq!(installed, "2.0"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(manager.get("x").unwrap().version, "2.0");

    let outcome = manager
        .install(&module_archive(downloads.path(), "x", "2.1", "new"))
        .unwrap();
    assert_eq!(outcome.path(), live.as_path());
    assert_eq!(manager.get("x").unwrap().version, "2.1");
    assert_eq!(manager.get("x").unwrap().root, live);
    assert!(std::fs::read_to_string(shadowed.join("module.yaml")).unwrap().contains("\"1.0\""));
}

/// 启动时的强制停用通过通知输出一次
#[test]
fn test_manager_cascade_notice() {
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "shop", "1.0", "requires:\n  - [payments]\n");
    write_module(modules.path(), "reviews", "1.0", "requires:\n  - [shop]\n");

    let sink = Arc::new(MemoryNoticeSink::new());
    let mut manager = ModuleManager::with_notice_sink(config(modules.path()), sink.clone()).unwrap();

    assert!(manager.load_order_ids().is_empty());
    let notices = sink.take();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("requires payments module, which is not installed"));
    assert!(notices[0].contains("reviews"));

    // 已停用后再次扫描不再产生通知
    assert!(manager.rescan().is_empty());
    assert!(sink.take().is_empty());

    assert!(matches!(
        manager.activate("shop"),
        Err(CoreError::UnmetDependencies { .. })
    ));
}

/// 仓库清单对比
#[test]
fn test_manager_available_updates_from_feed() {
    let modules = TempDir::new().unwrap();
    let feeds = TempDir::new().unwrap();
    write_module(modules.path(), "gallery", "1.0", "");

    let feed = feeds.path().join("feed.json");
    std::fs::write(
        &feed,
        r#"{"packages": [
            {"id": "gallery", "version": "1.0.1", "download_url": "https://example.org/gallery.zip"},
            {"id": "unknown", "version": "3.0"}
        ]}"#,
    )
    .unwrap();

    let manager = ModuleManager::start(config(modules.path())).unwrap();
    let updates = manager.available_updates(&FeedFileSource::new(&feed)).unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].module_id, "gallery");
    assert_eq!(updates[0].available_version, "1.0.1");
}

/// 配置文件驱动的启动
#[test]
fn test_manager_from_config_file() {
    let modules = TempDir::new().unwrap();
    let etc = TempDir::new().unwrap();
    write_module(modules.path(), "dark", "1.0", "type: theme\n");
    write_module(modules.path(), "gallery", "1.0", "type: plugin\n");

    let path = etc.path().join("engine.yaml");
    std::fs::write(
        &path,
        format!(
            "modules:\n  roots:\n    - {}\n  module_type: theme\n",
            modules.path().display()
        ),
    )
    .unwrap();

    let manager = ModuleManager::start(EngineConfig::from_file(&path).unwrap()).unwrap();
    assert_eq!(manager.load_order_ids(), vec!["dark"]);
    assert_eq!(manager.state("gallery"), Some(ModuleState::Invalid));
    assert_eq!(manager.discovery_errors().len(), 1);
}

/// 异步外观：安装与启停串行执行
#[tokio::test]
async fn test_shared_manager_install_and_toggle() {
    let downloads = TempDir::new().unwrap();
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "base", "1.0", "");

    let shared = SharedModuleManager::start(config(modules.path())).await.unwrap();

    let archive = module_archive(downloads.path(), "addon", "1.0", "payload");
    let outcome = shared.install(archive.clone()).await.unwrap();
    assert_eq!(outcome.module_id(), "addon");
    assert!(!archive.exists());

    let handles: Vec<_> = ["base", "addon"]
        .into_iter()
        .map(|id| {
            let shared = shared.clone();
            tokio::spawn(async move { shared.deactivate(id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(shared.load_order_ids().await.is_empty());

    let err = shared.deactivate("base").await.unwrap_err();
    assert!(matches!(err, CoreError::ModuleAlreadyDisabled(_)));

    let removed = shared.delete("addon").await.unwrap();
    assert!(!removed.root.exists());
    assert_eq!(shared.read(|m| m.state("addon")).await, None);
}
