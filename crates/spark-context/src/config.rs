//! 运行时装配参数。
//!
//! # 设计背景（Why）
//! - 默认运行时会创建两类后台线程：计时器驱动线程与观察线程；线程名与栈大小需要与宿主的
//!   监控、线程预算保持一致，因此以可序列化的设置结构集中表达；
//! - 设置可以从 TOML 片段加载，便于与宿主的配置文件合并。
//!
//! # 契约说明（What）
//! - 所有字段均有默认值，缺省字段按默认值补齐，未知字段被拒绝；
//! - [`RuntimeSettings::validate`] 在装配运行时前检查线程名与栈大小。
//!
//! ```toml
//! timer_thread_name = "svc-context-timer"
//! watcher_thread_name = "svc-context-watcher"
//! watcher_stack_size = 131072
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, Result};
use crate::time::DEFAULT_TIMER_THREAD_NAME;

/// 默认观察线程名。
pub const DEFAULT_WATCHER_THREAD_NAME: &str = "spark-context-watcher";

/// 观察线程允许的最小栈大小（字节）。
pub const MIN_WATCHER_STACK_SIZE: usize = 16 * 1024;

/// 默认运行时的线程装配参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    /// 计时器驱动线程名。
    pub timer_thread_name: String,
    /// 观察线程名。
    pub watcher_thread_name: String,
    /// 观察线程栈大小；`None` 表示沿用标准库默认值。
    pub watcher_stack_size: Option<usize>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            timer_thread_name: DEFAULT_TIMER_THREAD_NAME.to_owned(),
            watcher_thread_name: DEFAULT_WATCHER_THREAD_NAME.to_owned(),
            watcher_stack_size: None,
        }
    }
}

impl RuntimeSettings {
    /// 从 TOML 文本解析并校验设置。
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let settings: Self = toml::from_str(input).map_err(|error| {
            tracing::error!(%error, "failed to parse context runtime settings");
            ContextError::InvalidSettings {
                field: "<document>",
                reason: error.to_string(),
            }
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// 序列化为 TOML 文本。
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|error| ContextError::InvalidSettings {
            field: "<document>",
            reason: error.to_string(),
        })
    }

    /// 校验线程名非空且不含 NUL，栈大小不低于 [`MIN_WATCHER_STACK_SIZE`]。
    pub fn validate(&self) -> Result<()> {
        check_thread_name("timer_thread_name", &self.timer_thread_name)?;
        check_thread_name("watcher_thread_name", &self.watcher_thread_name)?;
        if let Some(bytes) = self.watcher_stack_size {
            if bytes < MIN_WATCHER_STACK_SIZE {
                return Err(ContextError::InvalidSettings {
                    field: "watcher_stack_size",
                    reason: format!("{bytes} bytes is below the {MIN_WATCHER_STACK_SIZE} byte minimum"),
                });
            }
        }
        Ok(())
    }
}

fn check_thread_name(field: &'static str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ContextError::InvalidSettings {
            field,
            reason: "thread name must not be empty".to_owned(),
        });
    }
    if name.contains('\0') {
        return Err(ContextError::InvalidSettings {
            field,
            reason: "thread name must not contain NUL".to_owned(),
        });
    }
    Ok(())
}
