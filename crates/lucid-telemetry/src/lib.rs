mod logging;
mod metrics;

pub use logging::{LogQuery, LogRecord, WarningLayer, WarningLog};
pub use metrics::{HistogramSummary, MetricType, MetricsQuery, MetricsRecorder, MetricsSnapshot};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "lucid_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Install the JSON stdout layer. Off when the host application owns the subscriber.
    pub install_subscriber: bool,
    /// Keep the most recent warn+ logs in memory.
    pub capture_warnings: bool,
    pub warning_capacity: usize,
    /// Whether metrics recording is enabled.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            install_subscriber: true,
            capture_warnings: true,
            warning_capacity: 512,
            metrics_enabled: true,
        }
    }
}

/// Handle to the telemetry subsystem. Cheap to clone.
#[derive(Clone)]
pub struct TelemetryGuard {
    warnings: Option<Arc<WarningLog>>,
    metrics_recorder: Option<Arc<MetricsRecorder>>,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    installed: bool,
}

impl TelemetryGuard {
    /// A guard with metrics only and no subscriber, for embedding and tests.
    pub fn detached() -> Self {
        Self {
            warnings: None,
            metrics_recorder: Some(Arc::new(MetricsRecorder::new())),
            level_filter: Arc::new(RwLock::new(Vec::new())),
            installed: false,
        }
    }

    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let mut levels = self.level_filter.write();
        if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
            entry.1 = level;
        } else {
            levels.push((module.to_string(), level));
        }
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }

    /// Access the metrics recorder for recording and querying.
    pub fn metrics(&self) -> Option<&MetricsRecorder> {
        self.metrics_recorder.as_deref()
    }

    pub fn metrics_handle(&self) -> Option<Arc<MetricsRecorder>> {
        self.metrics_recorder.clone()
    }

    /// Recent warnings, if capture is on.
    pub fn warnings(&self) -> Option<&WarningLog> {
        self.warnings.as_deref()
    }

    /// Whether this guard's subscriber became the global default.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the telemetry subsystem.
///
/// Safe to call more than once: if a global subscriber already exists the
/// new one is discarded and the returned guard still carries its own metrics.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let level_filter = Arc::new(RwLock::new(config.module_levels.clone()));

    let metrics_recorder = config
        .metrics_enabled
        .then(|| Arc::new(MetricsRecorder::new()));

    let warnings = config
        .capture_warnings
        .then(|| Arc::new(WarningLog::new(config.warning_capacity)));

    if !config.install_subscriber {
        return TelemetryGuard {
            warnings: None,
            metrics_recorder,
            level_filter,
            installed: false,
        };
    }

    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let warning_layer = warnings.clone().map(WarningLayer::new);

    let installed = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(warning_layer)
        .try_init()
        .is_ok();

    TelemetryGuard {
        warnings: if installed { warnings } else { None },
        metrics_recorder,
        level_filter,
        installed,
    }
}
