//! Instrumentation configuration.

use opentelemetry::trace::SpanRef;

use std::{any::Any, fmt, panic};

use warren_hooks::{ConsumeEvent, PublishEvent, RpcReplyEvent};

type PublishHook = Box<dyn Fn(&SpanRef<'_>, &PublishEvent<'_>) + Send + Sync>;
type ConsumeHook = Box<dyn Fn(&SpanRef<'_>, &ConsumeEvent<'_>) + Send + Sync>;
type RpcReplyHook = Box<dyn Fn(&SpanRef<'_>, &RpcReplyEvent<'_>) + Send + Sync>;

/// Configuration of [`WarrenInstrumentation`](crate::WarrenInstrumentation).
///
/// The customization hooks let applications amend freshly started spans
/// (e.g. add app-specific attributes) before the instrumented operation runs.
/// A panicking hook is caught and logged; it never disturbs the client or
/// the span bookkeeping.
#[derive(Default)]
pub struct Config {
    publish_hook: Option<PublishHook>,
    consume_hook: Option<ConsumeHook>,
    rpc_reply_hook: Option<RpcReplyHook>,
}

impl Config {
    /// Creates a configuration without customization hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a hook invoked with each publish attempt span right after it is started.
    #[must_use]
    pub fn with_publish_hook(
        mut self,
        hook: impl Fn(&SpanRef<'_>, &PublishEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.publish_hook = Some(Box::new(hook));
        self
    }

    /// Sets a hook invoked with each receive span right after it is started.
    #[must_use]
    pub fn with_consume_hook(
        mut self,
        hook: impl Fn(&SpanRef<'_>, &ConsumeEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.consume_hook = Some(Box::new(hook));
        self
    }

    /// Sets a hook invoked with each RPC reply span right after it is started.
    #[must_use]
    pub fn with_rpc_reply_hook(
        mut self,
        hook: impl Fn(&SpanRef<'_>, &RpcReplyEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.rpc_reply_hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn notify_publish(&self, span: &SpanRef<'_>, event: &PublishEvent<'_>) {
        if let Some(hook) = &self.publish_hook {
            run_isolated("publish", || hook(span, event));
        }
    }

    pub(crate) fn notify_consume(&self, span: &SpanRef<'_>, event: &ConsumeEvent<'_>) {
        if let Some(hook) = &self.consume_hook {
            run_isolated("consume", || hook(span, event));
        }
    }

    pub(crate) fn notify_rpc_reply(&self, span: &SpanRef<'_>, event: &RpcReplyEvent<'_>) {
        if let Some(hook) = &self.rpc_reply_hook {
            run_isolated("rpc_reply", || hook(span, event));
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Config")
            .field("publish_hook", &self.publish_hook.is_some())
            .field("consume_hook", &self.consume_hook.is_some())
            .field("rpc_reply_hook", &self.rpc_reply_hook.is_some())
            .finish()
    }
}

/// Runs `operation`, catching and logging a panic instead of propagating it.
///
/// Instrumentation runs inside client operations; a panic here must never
/// abort a publish or a delivery.
pub(crate) fn run_isolated(name: &str, operation: impl FnOnce()) {
    if let Err(panic) = panic::catch_unwind(panic::AssertUnwindSafe(operation)) {
        // `&panic` would coerce the box itself into `dyn Any`, hiding the payload.
        let panic = panic_message(panic.as_ref());
        tracing::error!(hook = name, panic, "instrumentation hook panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
