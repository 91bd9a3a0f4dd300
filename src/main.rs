//! Chips Modules 命令行入口
//!
//! 对模块目录执行扫描、检查、启停、删除和安装。
//!
//! # 命令概览
//!
//! - `list` - 列出所有模块及其状态
//! - `check` - 报告扫描错误和未满足的依赖
//! - `order` - 显示已启用模块的加载顺序
//! - `enable` / `disable` - 启用或停用模块
//! - `delete` - 删除模块目录
//! - `install` - 安装或升级安装包
//! - `updates` - 对比仓库清单，列出可升级的模块
//! - `check-config` - 验证配置文件
//!
//! # 使用示例
//!
//! ```bash
//! # 使用配置文件列出模块
//! chips-modules -c engine.yaml list
//!
//! # 不使用配置文件，直接指定根目录
//! chips-modules --root ./modules --root /usr/share/chips/modules check
//!
//! # 安装前只检查安装包
//! chips-modules --root ./modules install gallery-1.2.zip --dry-run
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use chips_modules::module::external::FeedFileSource;
use chips_modules::module::installer::BundleStatus;
use chips_modules::{
    EngineConfig, InstallOutcome, LogGuard, Logger, LoggerConfig, ModuleDefinition, ModuleState,
    SharedModuleManager,
};

/// Chips Modules - 薯片模块引擎
#[derive(Parser)]
#[command(name = "chips-modules")]
#[command(version, about = "插件/主题模块的发现、依赖解析、启停与安装", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径（不存在时使用默认配置）
    #[arg(short, long, default_value = "chips-modules.yaml", global = true)]
    config: PathBuf,

    /// 模块根目录（可重复指定，覆盖配置文件中的根目录）
    #[arg(short, long = "root", global = true)]
    roots: Vec<PathBuf>,

    /// 救援模式：所有模块都以停用状态载入
    #[arg(long, global = true)]
    rescue: bool,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 列出所有模块
    List,

    /// 检查模块
    ///
    /// 报告扫描错误和未满足的依赖；存在问题时以非零状态退出。
    Check,

    /// 显示加载顺序
    Order,

    /// 启用模块
    Enable {
        /// 模块 ID
        id: String,
    },

    /// 停用模块
    Disable {
        /// 模块 ID
        id: String,
    },

    /// 删除模块目录（不可恢复）
    Delete {
        /// 模块 ID
        id: String,

        /// 确认删除
        #[arg(long)]
        yes: bool,
    },

    /// 安装或升级安装包
    ///
    /// 无论成功与否，安装包文件都会被删除（--dry-run 除外）。
    Install {
        /// 安装包路径（zip）
        archive: PathBuf,

        /// 只检查安装包，不安装
        #[arg(long)]
        dry_run: bool,
    },

    /// 列出仓库清单中可升级的模块
    Updates {
        /// 仓库清单文件（JSON）
        feed: PathBuf,
    },

    /// 验证配置文件
    CheckConfig,
}

/// 加载配置文件并叠加命令行参数
fn load_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = if cli.config.exists() {
        EngineConfig::from_file(&cli.config)?
    } else {
        EngineConfig::default()
    };

    let mut overrides = EngineConfig::default();
    overrides.modules.roots = cli.roots.clone();
    overrides.modules.rescue_mode = cli.rescue;
    if let Some(level) = &cli.log_level {
        overrides.logging.level = level.clone();
    }
    config.merge(overrides);

    Ok(config)
}

fn init_logging(config: &EngineConfig) -> LogGuard {
    Logger::try_init(LoggerConfig::from_log_config(&config.logging))
}

fn state_label(state: Option<ModuleState>) -> &'static str {
    match state {
        Some(ModuleState::Enabled) => "启用",
        Some(ModuleState::Disabled) => "停用",
        Some(ModuleState::Invalid) => "无效",
        None => "未知",
    }
}

fn print_module(module: &ModuleDefinition, state: Option<ModuleState>) {
    println!(
        "  [{}] {:<24} {:<10} {}",
        state_label(state),
        module.id,
        module.version,
        module.name
    );
    for error in &module.validation_errors {
        println!("        ✗ {}", error);
    }
    for reason in module.dep_missing.values() {
        println!("        ⚠ {}", reason);
    }
    if !module.dep_children.is_empty() {
        println!("        被依赖: {}", module.dep_children.join(", "));
    }
}

async fn list_modules(shared: &SharedModuleManager) {
    shared
        .read(|manager| {
            println!();
            println!("模块列表");
            println!("═══════════════════════════════════════");
            let registry = manager.registry();
            if registry.is_empty() {
                println!("  (没有发现任何模块)");
            }
            for module in registry.modules().chain(registry.invalid().values()) {
                print_module(module, registry.state(&module.id));
            }
            println!("═══════════════════════════════════════");
            println!(
                "  启用 {} / 停用 {} / 无效 {}",
                registry.enabled().len(),
                registry.disabled().len(),
                registry.invalid().len()
            );
            println!();
        })
        .await
}

async fn check_modules(shared: &SharedModuleManager) -> Result<(), Box<dyn std::error::Error>> {
    let problems = shared
        .read(|manager| {
            let mut problems = 0;
            for error in manager.discovery_errors() {
                println!("✗ {}", error);
                problems += 1;
            }
            for (module_id, deps) in &manager.resolution().modules {
                for reason in deps.missing.values() {
                    println!("⚠ {}: {}", module_id, reason);
                    problems += 1;
                }
            }
            problems
        })
        .await;

    if problems == 0 {
        println!("✅ 所有模块检查通过");
        Ok(())
    } else {
        Err(format!("发现 {} 个问题", problems).into())
    }
}

async fn show_order(shared: &SharedModuleManager) {
    shared
        .read(|manager| {
            for (index, module) in manager.load_order().into_iter().enumerate() {
                println!("{:>3}. {:<24} priority={}", index + 1, module.id, module.priority);
            }
        })
        .await
}

async fn install(
    shared: &SharedModuleManager,
    archive: &Path,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if dry_run {
        let archive = archive.to_path_buf();
        let bundle = shared.run(move |manager| manager.inspect(&archive)).await?;
        match &bundle.status {
            BundleStatus::New => println!("新模块 {} {}", bundle.module_id(), bundle.definition.version),
            BundleStatus::Upgrade { installed_version } => println!(
                "升级 {}: {} -> {}",
                bundle.module_id(),
                installed_version,
                bundle.definition.version
            ),
            BundleStatus::Rejected(rejection) => println!("拒绝安装 {}: {:?}", bundle.module_id(), rejection),
        }
        println!("目标目录: {}", bundle.destination.display());
        return Ok(());
    }

    match shared.install(archive).await? {
        InstallOutcome::New { module_id, version, path } => {
            println!("✅ 已安装 {} {} 到 {}", module_id, version, path.display());
        }
        InstallOutcome::Upgrade {
            module_id,
            previous_version,
            version,
            ..
        } => {
            println!("✅ 已升级 {}: {} -> {}", module_id, previous_version, version);
        }
    }
    Ok(())
}

async fn show_updates(shared: &SharedModuleManager, feed: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let updates = shared
        .run(move |manager| manager.available_updates(&FeedFileSource::new(feed)))
        .await?;
    if updates.is_empty() {
        println!("所有模块都是最新版本");
    }
    for update in updates {
        println!(
            "{:<24} {} -> {}",
            update.module_id, update.installed_version, update.available_version
        );
    }
    Ok(())
}

/// 检查配置文件
fn check_config(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    match &config.config_path {
        Some(path) => println!("配置文件: {}", path.display()),
        None => println!("⚠️  未找到配置文件，使用默认配置"),
    }
    println!("────────────────────────────────────────");
    println!("  [模块配置]");
    println!("    根目录:         {:?}", config.modules.roots);
    println!("    安装目录:       {:?}", config.install_root());
    println!("    可删除目录:     {:?}", config.deletable_roots());
    println!("    模块类型:       {}", config.modules.module_type);
    println!("    救援模式:       {}", if config.modules.rescue_mode { "是" } else { "否" });
    println!();
    println!("  [宿主]");
    println!("    ID:             {}", config.host.id);
    println!("    版本:           {}", config.host.version);
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!("────────────────────────────────────────");

    match config.validate() {
        Ok(()) => {
            println!("✅ 配置有效");
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置无效: {}", e);
            Err(Box::new(e))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if matches!(cli.command, Commands::CheckConfig) {
        return check_config(&config);
    }

    let _guard = init_logging(&config);
    debug!(roots = ?config.modules.roots, "已加载配置");

    let shared = SharedModuleManager::start(config).await?;

    match cli.command {
        Commands::List => list_modules(&shared).await,
        Commands::Check => check_modules(&shared).await?,
        Commands::Order => show_order(&shared).await,
        Commands::Enable { id } => {
            shared.activate(id.clone()).await?;
            println!("✅ 已启用 {}", id);
        }
        Commands::Disable { id } => {
            shared.deactivate(id.clone()).await?;
            println!("✅ 已停用 {}", id);
        }
        Commands::Delete { id, yes } => {
            if !yes {
                return Err(format!("删除 {} 不可恢复，请使用 --yes 确认", id).into());
            }
            let removed = shared.delete(id).await?;
            println!("✅ 已删除 {} ({})", removed.id, removed.root.display());
        }
        Commands::Install { archive, dry_run } => install(&shared, &archive, dry_run).await?,
        Commands::Updates { feed } => show_updates(&shared, feed).await?,
        Commands::CheckConfig => {}
    }

    info!("命令执行完成");
    Ok(())
}
