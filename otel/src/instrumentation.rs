//! Instrumentation installer.

use once_cell::sync::Lazy;
use opentelemetry::{global, propagation::TextMapPropagator};
use semver::{Version, VersionReq};

use std::{
    error, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    config::{run_isolated, Config},
    handlers::HandlerState,
};
use warren_hooks::Hooks;

/// Hook contract versions this crate can instrument.
static SUPPORTED_CLIENT_VERSIONS: Lazy<VersionReq> =
    Lazy::new(|| VersionReq::parse(">=0.1.0").expect("version requirement is not valid semver"));

/// Error returned by [`WarrenInstrumentation::install()`].
#[derive(Debug)]
#[non_exhaustive]
pub enum InstallError {
    /// The client reports a hook contract version this crate does not support.
    UnsupportedClientVersion {
        /// Version reported by the client.
        version: Version,
        /// Versions the instrumentation supports.
        supported: VersionReq,
    },
}

impl fmt::Display for InstallError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedClientVersion { version, supported } => write!(
                formatter,
                "client hook version {version} is not supported; version {supported} is required"
            ),
        }
    }
}

impl error::Error for InstallError {}

/// OpenTelemetry trace instrumentation for the warren AMQP client.
///
/// Installing the instrumentation registers handlers on the client's hook
/// registry. The handlers create a span per messaging operation, propagate
/// the trace context through message headers, and never raise: a panic in
/// a handler or in a configured customization hook is caught and logged.
pub struct WarrenInstrumentation {
    config: Arc<Config>,
    propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
    installed: AtomicBool,
}

impl WarrenInstrumentation {
    /// Creates an instrumentation with the provided configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            propagator: None,
            installed: AtomicBool::new(false),
        }
    }

    /// Overrides the globally installed propagator for header injection
    /// and extraction.
    #[must_use]
    pub fn with_propagator(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        self.propagator = Some(Arc::new(propagator));
        self
    }

    /// Registers the span handlers on the client's hook registry.
    ///
    /// Installation is sticky: the first successful call registers the
    /// handlers, repeated calls are no-ops. The client offers no way to
    /// unregister a handler, so there is no uninstall either.
    ///
    /// # Errors
    ///
    /// Fails without registering anything if the registry reports a hook
    /// contract version this crate does not support.
    pub fn install(&self, hooks: &mut Hooks) -> Result<(), InstallError> {
        if !SUPPORTED_CLIENT_VERSIONS.matches(hooks.version()) {
            return Err(InstallError::UnsupportedClientVersion {
                version: hooks.version().clone(),
                supported: SUPPORTED_CLIENT_VERSIONS.clone(),
            });
        }
        if self.installed.swap(true, Ordering::SeqCst) {
            tracing::debug!("instrumentation is already installed; skipping");
            return Ok(());
        }

        let state = Arc::new(HandlerState::new(
            global::tracer("warren-otel"),
            self.propagator.clone(),
            Arc::clone(&self.config),
        ));

        let handler = Arc::clone(&state);
        hooks.connection.on_after_connect(move |event| {
            run_isolated("after_connect", || handler.on_after_connect(event));
        });
        let handler = Arc::clone(&state);
        hooks.producer.on_before_publish(move |event| {
            run_isolated("before_publish", || handler.on_before_publish(event));
        });
        let handler = Arc::clone(&state);
        hooks.producer.on_after_publish(move |event| {
            run_isolated("after_publish", || handler.on_after_publish(event));
        });
        let handler = Arc::clone(&state);
        hooks.consumer.on_before_process(move |event| {
            run_isolated("before_process", || handler.on_before_process(event));
        });
        let handler = Arc::clone(&state);
        hooks.consumer.on_after_process(move |event| {
            run_isolated("after_process", || handler.on_after_process(event));
        });
        let handler = Arc::clone(&state);
        hooks.consumer.on_before_rpc_reply(move |event| {
            run_isolated("before_rpc_reply", || handler.on_before_rpc_reply(event));
        });
        let handler = state;
        hooks.consumer.on_after_rpc_reply(move |event| {
            run_isolated("after_rpc_reply", || handler.on_after_rpc_reply(event));
        });
        Ok(())
    }
}

impl fmt::Debug for WarrenInstrumentation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WarrenInstrumentation")
            .field("config", &self.config)
            .field("propagator", &self.propagator.is_some())
            .field("installed", &self.installed.load(Ordering::Relaxed))
            .finish()
    }
}
