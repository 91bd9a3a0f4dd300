//! 模块扩展点
//!
//! 模块在加载时把 [`Hook`] 实现注册到命名通道上，宿主在扩展点处调用
//! [`HookRegistry::dispatch`]。调用顺序由模块加载顺序决定，
//! 未出现在加载顺序中的模块（已停用）不会被调用。
//!
//! ```rust
//! use chips_modules::module::hooks::HookRegistry;
//!
//! let mut hooks: HookRegistry<String> = HookRegistry::new();
//! hooks.register("menu", "gallery", |item: &String| -> chips_modules::Result<()> {
//!     assert_eq!(item, "home");
//!     Ok(())
//! });
//!
//! let report = hooks.dispatch("menu", &"home".to_string(), &["gallery".to_string()]);
//! assert_eq!(report.invoked, vec!["gallery".to_string()]);
//! ```

use std::collections::HashMap;
use std::fmt;

use tracing::{trace, warn};

use crate::utils::Result;

/// 扩展点回调
pub trait Hook<E>: Send + Sync {
    /// 处理一次扩展点调用
    fn call(&self, args: &E) -> Result<()>;
}

impl<E, F> Hook<E> for F
where
    F: Fn(&E) -> Result<()> + Send + Sync,
{
    fn call(&self, args: &E) -> Result<()> {
        self(args)
    }
}

struct Registration<E> {
    module_id: String,
    hook: Box<dyn Hook<E>>,
}

/// 一次调用的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 成功调用的模块（按调用顺序）
    pub invoked: Vec<String>,
    /// 调用失败的模块及错误
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 类型化的扩展点注册表
pub struct HookRegistry<E> {
    channels: HashMap<String, Vec<Registration<E>>>,
}

impl<E> Default for HookRegistry<E> {
    fn default() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }
}

impl<E> fmt::Debug for HookRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .channels
            .iter()
            .map(|(name, hooks)| (name.as_str(), hooks.len()))
            .collect();
        f.debug_struct("HookRegistry").field("channels", &counts).finish()
    }
}

impl<E> HookRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调
    ///
    /// 同一模块可以在同一通道上注册多个回调，按注册顺序调用。
    pub fn register<H>(&mut self, channel: impl Into<String>, module_id: impl Into<String>, hook: H)
    where
        H: Hook<E> + 'static,
    {
        let channel = channel.into();
        let module_id = module_id.into();
        trace!(channel = %channel, module_id = %module_id, "注册扩展点回调");
        self.channels.entry(channel).or_default().push(Registration {
            module_id,
            hook: Box::new(hook),
        });
    }

    /// 移除模块在所有通道上的回调
    ///
    /// # Returns
    ///
    /// 移除的回调数量
    pub fn unregister_module(&mut self, module_id: &str) -> usize {
        let mut removed = 0;
        for hooks in self.channels.values_mut() {
            let before = hooks.len();
            hooks.retain(|r| r.module_id != module_id);
            removed += before - hooks.len();
        }
        self.channels.retain(|_, hooks| !hooks.is_empty());
        removed
    }

    /// 通道上的回调数量
    pub fn hook_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(Vec::len).unwrap_or(0)
    }

    /// 按加载顺序调用通道上的回调
    ///
    /// 单个回调失败不会中断其余回调。
    pub fn dispatch(&self, channel: &str, args: &E, load_order: &[String]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(hooks) = self.channels.get(channel) else {
            return report;
        };

        let mut ordered: Vec<(usize, &Registration<E>)> = hooks
            .iter()
            .filter_map(|r| {
                load_order
                    .iter()
                    .position(|id| id == &r.module_id)
                    .map(|position| (position, r))
            })
            .collect();
        // 稳定排序，同一模块内保持注册顺序
        ordered.sort_by_key(|(position, _)| *position);

        for (_, registration) in ordered {
            match registration.hook.call(args) {
                Ok(()) => report.invoked.push(registration.module_id.clone()),
                Err(e) => {
                    warn!(channel = %channel, module_id = %registration.module_id, error = %e, "扩展点回调失败");
                    report.failed.push((registration.module_id.clone(), e.to_string()));
                }
            }
        }
        report
    }
}
