//! Logging manager for the operator process
//!
//! Installs a JSON `tracing` subscriber (with OTLP export when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set) and hands out named [`Logger`]s,
//! each gated at its own level. Installing the subscriber also bridges the
//! `log` facade into `tracing`; failing to do so is fatal at startup.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

#[cfg(test)]
use mockall::automock;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::Error;

/// Level names accepted on top of the tracing ones
pub const LEVEL_CRITICAL: &str = "critical";
/// Disables a logger entirely
pub const LEVEL_DISABLED: &str = "disabled";

/// Filter used when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info,kube=info,tower=warn,hyper=warn,h2=warn";

/// Loggers do their own level gating, so events emitted through them are
/// always let through, whatever `RUST_LOG` says.
const LOGGER_DIRECTIVE: &str = "clabernetes_operator::logging=trace";

/// Process logging collaborator
#[cfg_attr(test, automock)]
pub trait LogManager: Send + Sync {
    /// Install the global subscriber and the `log` bridge
    fn init(&self) -> Result<(), Error>;

    /// Register (or fetch) the logger `name` at `level`
    fn register_logger(&self, name: &str, level: &str) -> Result<Logger, Error>;

    /// Flush anything buffered by the logging backends
    fn flush(&self);
}

/// Parse a logger level name
///
/// Accepts the tracing level names plus `critical` (error) and `disabled` (off).
pub fn parse_level(level: &str) -> Result<LevelFilter, Error> {
    match level.trim().to_ascii_lowercase().as_str() {
        LEVEL_CRITICAL | "fatal" => Ok(LevelFilter::ERROR),
        LEVEL_DISABLED => Ok(LevelFilter::OFF),
        "warning" => Ok(LevelFilter::WARN),
        other => LevelFilter::from_str(other)
            .map_err(|_| Error::Logging(format!("invalid logger level '{level}'"))),
    }
}

/// Named logger gated at its own level
#[derive(Clone, Debug)]
pub struct Logger {
    name: Arc<str>,
    level: LevelFilter,
}

impl Logger {
    /// Create a logger; prefer [`LogManager::register_logger`]
    pub fn new(name: &str, level: LevelFilter) -> Self {
        Self {
            name: Arc::from(name),
            level,
        }
    }

    /// Logger name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most verbose level this logger emits
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Whether events at `level` are emitted
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    /// Log at debug
    pub fn debug(&self, message: impl Display) {
        if self.enabled(Level::DEBUG) {
            tracing::debug!(logger = %self.name, "{message}");
        }
    }

    /// Log at info
    pub fn info(&self, message: impl Display) {
        if self.enabled(Level::INFO) {
            tracing::info!(logger = %self.name, "{message}");
        }
    }

    /// Log at warn
    pub fn warn(&self, message: impl Display) {
        if self.enabled(Level::WARN) {
            tracing::warn!(logger = %self.name, "{message}");
        }
    }

    /// Log at error
    pub fn error(&self, message: impl Display) {
        if self.enabled(Level::ERROR) {
            tracing::error!(logger = %self.name, "{message}");
        }
    }

    /// Log a condition the process will not survive
    pub fn critical(&self, message: impl Display) {
        if self.enabled(Level::ERROR) {
            tracing::error!(logger = %self.name, severity = LEVEL_CRITICAL, "{message}");
        }
    }
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces (e.g., "clabernetes")
    pub service_name: String,

    /// OTLP endpoint for trace export; traces stay local when unset
    pub otlp_endpoint: Option<String>,

    /// Pod name recorded on the trace resource
    pub pod_name: Option<String>,

    /// Pod namespace recorded on the trace resource
    pub pod_namespace: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: crate::LOGGER_NAME.to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            pod_name: None,
            pod_namespace: None,
        }
    }
}

/// [`LogManager`] backed by `tracing-subscriber` and OpenTelemetry
pub struct TelemetryLogManager {
    config: TelemetryConfig,
    provider: OnceLock<TracerProvider>,
    loggers: Mutex<BTreeMap<String, Logger>>,
}

impl TelemetryLogManager {
    /// Create an uninitialized manager
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            provider: OnceLock::new(),
            loggers: Mutex::new(BTreeMap::new()),
        }
    }
}

impl LogManager for TelemetryLogManager {
    fn init(&self) -> Result<(), Error> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let otel_layer = match &self.config.otlp_endpoint {
            Some(endpoint) => {
                let provider = init_otlp_tracer(endpoint, build_resource(&self.config))?;
                let tracer = provider.tracer(self.config.service_name.clone());
                let _ = self.provider.set(provider);
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            None => None,
        };

        let env_filter = build_env_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);

        // try_init also installs the log -> tracing bridge
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::Logging(format!("failed patching log bridge: {e}")))
    }

    fn register_logger(&self, name: &str, level: &str) -> Result<Logger, Error> {
        let level = parse_level(level)?;
        let mut loggers = self.loggers.lock();

        let logger = loggers
            .entry(name.to_string())
            .or_insert_with(|| Logger::new(name, level));

        Ok(logger.clone())
    }

    fn flush(&self) {
        if let Some(provider) = self.provider.get() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed flushing trace exporter: {e}");
            }
        }
        let _ = std::io::stdout().flush();
    }
}

/// `RUST_LOG` (or the default filter) plus the logger passthrough
fn build_env_filter(rust_log: Option<&str>) -> EnvFilter {
    let filter = rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    match LOGGER_DIRECTIVE.parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn build_resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            crate::VERSION,
        ),
    ];

    if let Some(pod_name) = &config.pod_name {
        attributes.push(KeyValue::new("k8s.pod.name", pod_name.clone()));
    }
    if let Some(namespace) = &config.pod_namespace {
        attributes.push(KeyValue::new("k8s.namespace.name", namespace.clone()));
    }

    Resource::new(attributes)
}

fn init_otlp_tracer(endpoint: &str, resource: Resource) -> Result<TracerProvider, Error> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Logging(format!("failed initializing trace exporter: {e}")))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}
