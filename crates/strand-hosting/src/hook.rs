use std::{
    any::Any,
    borrow::Cow,
    error::Error as StdError,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use tracing::{debug, error};

type HookFn = Box<dyn FnOnce() -> Result<(), Box<dyn StdError + Send + Sync>> + Send>;

/// 关闭钩子：服务端停止时按注册顺序恰好执行一次。
///
/// 钩子返回的错误与发生的 panic 都只记录日志，不会阻止后续钩子执行。
pub struct ShutdownHook {
    label: Cow<'static, str>,
    run: HookFn,
}

impl ShutdownHook {
    pub fn new<F, E>(label: impl Into<Cow<'static, str>>, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            label: label.into(),
            run: Box::new(move || hook().map_err(Into::into)),
        }
    }

    /// 不会失败的钩子。
    pub fn infallible<F>(label: impl Into<Cow<'static, str>>, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(label, move || {
            hook();
            Ok::<(), Box<dyn StdError + Send + Sync>>(())
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 执行钩子并吞掉失败；返回是否成功，供调用方统计。
    pub(crate) fn run(self, server: &str) -> bool {
        let Self { label, run } = self;
        match panic::catch_unwind(AssertUnwindSafe(run)) {
            Ok(Ok(())) => {
                debug!(server, hook = %label, "shutdown hook completed");
                true
            }
            Ok(Err(err)) => {
                error!(server, hook = %label, error = %err, "shutdown hook failed");
                false
            }
            Err(payload) => {
                error!(
                    server,
                    hook = %label,
                    panic = panic_message(payload.as_ref()),
                    "shutdown hook panicked"
                );
                false
            }
        }
    }
}

impl fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
