//! 日志系统模块
//!
//! 基于 tracing 生态初始化日志：
//!
//! - `RUST_LOG` 优先于配置中的级别，额外的过滤指令叠加在其上
//! - 控制台输出（可选 JSON 格式）
//! - 文件输出（tracing-appender 非阻塞写入，按时间轮转）
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_modules::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .log_dir("./logs")
//!         .rotation(RotationStrategy::Hourly)
//!         .directive("chips_modules::module::installer=trace")
//!         .build();
//!
//!     let _guard = Logger::init(config)?;
//!     tracing::info!(module_id = "gallery", "模块已启用");
//!     Ok(())
//! }
//! ```

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志文件轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 单个日志文件
    Never,
    /// 每小时一个文件
    Hourly,
    /// 每天一个文件
    #[default]
    Daily,
}

impl RotationStrategy {
    /// 从配置字符串解析，无法识别时按天轮转
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "never" | "none" | "off" => Self::Never,
            "hourly" | "hour" => Self::Hourly,
            _ => Self::Daily,
        }
    }

    fn as_rotation(self) -> Rotation {
        match self {
            Self::Never => Rotation::NEVER,
            Self::Hourly => Rotation::HOURLY,
            Self::Daily => Rotation::DAILY,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别
    pub level: String,

    /// JSON 格式输出
    pub json: bool,

    /// 关闭控制台输出（命令行静默模式）
    pub quiet: bool,

    /// 日志文件目录，`None` 表示不写文件
    pub log_dir: Option<PathBuf>,

    /// 日志文件名前缀
    pub file_prefix: String,

    pub rotation: RotationStrategy,

    /// 额外的过滤指令（EnvFilter 语法），例如 `chips_modules::module::registry=debug`
    pub directives: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            quiet: false,
            log_dir: None,
            file_prefix: "chips-modules".to_string(),
            rotation: RotationStrategy::Daily,
            directives: Vec::new(),
        }
    }
}

impl From<&LogConfig> for LoggerConfig {
    fn from(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json: log_config.json_format,
            log_dir: log_config
                .log_dir
                .clone()
                .filter(|_| log_config.file_output),
            rotation: RotationStrategy::from_name(&log_config.rotation),
            ..Self::default()
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从引擎配置的日志部分创建
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self::from(log_config)
    }

    fn default_level(&self) -> Level {
        self.level.trim().parse().unwrap_or(Level::INFO)
    }

    fn env_filter(&self) -> EnvFilter {
        // RUST_LOG 优先
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_level().to_string()));

        self.directives.iter().fold(base, |filter, raw| match raw.trim().parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        })
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn json(mut self, enable: bool) -> Self {
        self.config.json = enable;
        self
    }

    /// 关闭控制台输出
    pub fn quiet(mut self) -> Self {
        self.config.quiet = true;
        self
    }

    /// 写入日志文件
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    pub fn rotation(mut self, rotation: RotationStrategy) -> Self {
        self.config.rotation = rotation;
        self
    }

    /// 追加一条过滤指令
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.config.directives.push(directive.into());
        self
    }

    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志系统守卫
///
/// 丢弃时刷新非阻塞写入器中挂起的日志，必须保持到程序退出。
#[derive(Default)]
pub struct LogGuard {
    workers: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 是否持有写入器（重复初始化时返回的守卫为空）
    pub fn is_active(&self) -> bool {
        !self.workers.is_empty()
    }

    fn writer<W>(&mut self, target: W) -> NonBlocking
    where
        W: io::Write + Send + 'static,
    {
        let (writer, worker) = tracing_appender::non_blocking(target);
        self.workers.push(worker);
        writer
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 日志系统
pub struct Logger;

impl Logger {
    /// 安装全局订阅者
    ///
    /// # Returns
    ///
    /// 返回 `LogGuard`，必须保持到程序退出
    ///
    /// # Errors
    ///
    /// 已经初始化过，或全局订阅者已被其他代码设置
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed("日志系统已初始化".to_string()));
        }

        let mut guard = LogGuard::default();
        let console = (!config.quiet).then(|| guard.writer(io::stdout()));
        let file = config
            .log_dir
            .as_deref()
            .map(|dir| guard.writer(rolling_file(dir, &config)));
        let ansi = io::stdout().is_terminal();

        let installed = if config.json {
            tracing_subscriber::registry()
                .with(config.env_filter())
                .with(console.map(|w| fmt::layer().json().with_writer(w)))
                .with(file.map(|w| fmt::layer().json().with_writer(w)))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(config.env_filter())
                .with(console.map(|w| fmt::layer().with_writer(w).with_ansi(ansi)))
                .with(file.map(|w| fmt::layer().with_writer(w).with_ansi(false)))
                .try_init()
        };
        installed.map_err(|e| CoreError::InitFailed(format!("无法安装日志订阅者: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 不会失败的初始化，已初始化时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }
}

fn rolling_file(dir: &Path, config: &LoggerConfig) -> RollingFileAppender {
    RollingFileAppender::new(
        config.rotation.as_rotation(),
        dir,
        format!("{}.log", config.file_prefix),
    )
}
