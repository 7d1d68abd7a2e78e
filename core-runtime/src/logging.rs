//! # Logging & Tracing
//!
//! Installs the `tracing-subscriber` stack used by every crate in the
//! workspace:
//!
//! - an `EnvFilter` (our crates at the configured level, dependencies at
//!   `warn`, or a custom directive string)
//! - one fmt layer in `Pretty`, `Json` or `Compact` form, writing to stderr
//! - an optional forwarding layer that mirrors events to a host
//!   [`LoggerSink`]
//!
//! Forwarded entries carry the fields of the spans they were recorded in,
//! so an event inside `device_session{mount_path=..}` reaches the host with
//! its `mount_path`. Device serials are masked before they leave the
//! process unless redaction is turned off.
//!
//! ```ignore
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Json)
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(Arc::new(JournalSink::new()));
//!
//! init_logging(config)?;
//! ```

use crate::error::{Error, Result};

use bridge_traits::logging::{LogEntry, LogLevel, LoggerSink};

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates that log at the configured level; everything else logs at `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "device_scrobble_workspace",
    "core_runtime",
    "core_cache",
    "core_sync",
    "core_service",
    "bridge_desktop",
];

/// Field names whose values identify a physical device.
const SERIAL_FIELDS: &[&str] = &["device_id", "serial", "firewire_guid", "udi"];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable
    Pretty,
    /// One JSON object per line
    Json,
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Mask device serials in forwarded entries
    pub redact_serials: bool,
    /// Replaces the default directives, e.g. `"core_sync=trace,sqlx=info"`
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span open/close in the fmt layer
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            redact_serials: true,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("redact_serials", &self.redact_serials)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.is_some())
            .field("enable_spans", &self.enable_spans)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_serial_redaction(mut self, redact: bool) -> Self {
        self.redact_serials = redact;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// `Error::Config` for an invalid filter string, `Error::Logging` if a
/// global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let forward = SinkForwardLayer::new(config.logger_sink.clone(), config.redact_serials);

    tracing_subscriber::registry()
        .with(filter)
        .with(forward)
        .with(fmt_layer(&config))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

fn fmt_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(io::stderr);

    match config.format {
        LogFormat::Pretty => base.pretty().with_span_events(span_events).boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let mut directives: Vec<String> = WORKSPACE_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, config.level))
                .collect();
            directives.push("sqlx=warn".to_string());
            directives.join(",")
        }
    };

    EnvFilter::try_new(directives).map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

/// Fields recorded on a span, stored in the span's extensions.
#[derive(Default)]
struct SpanFields(BTreeMap<String, String>);

/// Mirrors events to a [`LoggerSink`].
struct SinkForwardLayer {
    sink: Option<Arc<dyn LoggerSink>>,
    redact: bool,
}

impl SinkForwardLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>, redact: bool) -> Self {
        Self { sink, redact }
    }

    fn build_entry<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>, level: LogLevel) -> LogEntry
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let metadata = event.metadata();
        let mut fields = BTreeMap::new();
        let mut span_name = None;

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(recorded) = span.extensions().get::<SpanFields>() {
                    fields.extend(recorded.0.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                span_name = Some(span.name().to_string());
            }
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        fields.extend(visitor.fields);

        if self.redact {
            for (key, value) in fields.iter_mut() {
                *value = redact_if_sensitive(key, value);
            }
        }

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());

        let mut entry = LogEntry::new(level, metadata.target(), message);
        entry.fields = fields;
        entry.span = span_name;
        entry
    }
}

impl<S> Layer<S> for SinkForwardLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if self.sink.is_none() {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut visitor = FieldCollector::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldCollector::default();
        values.record(&mut visitor);

        let mut extensions = span.extensions_mut();
        if let Some(recorded) = extensions.get_mut::<SpanFields>() {
            recorded.0.extend(visitor.fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let level = log_level(*event.metadata().level());
        if level < sink.min_level() {
            return;
        }

        let entry = self.build_entry(event, &ctx, level);
        let sink = Arc::clone(sink);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = sink.log(entry).await {
                        eprintln!("LoggerSink error: {}", err);
                    }
                });
            }
            Err(_) => {
                if let Err(err) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("LoggerSink error: {}", err);
                }
            }
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{:?}", value));
    }
}

fn log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Mask a value if its field name marks it as a device serial.
///
/// The last four characters stay visible so two devices can still be told
/// apart in a log; anything shorter is replaced entirely.
///
/// ```ignore
/// info!(device_id = %redact_if_sensitive("device_id", &guid), "Device mounted");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let field = field_name.to_lowercase();
    if value.is_empty() || !SERIAL_FIELDS.iter().any(|f| field.contains(f)) {
        return value.to_string();
    }

    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return REDACTED.to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// File name of a path, for logging cache and candidate locations without
/// the directories (which embed device serials).
pub fn strip_path(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}
