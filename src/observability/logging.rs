//! Structured logging.
//!
//! # Responsibilities
//! - Carry per-component log context (scope fields, level, outputs)
//! - Mirror every event to `tracing` for console output, with the common
//!   scope keys recorded as real fields
//! - Fan events out as JSON lines to registered outputs
//!
//! # Design Decisions
//! - Loggers are plain values handed to each component, never globals
//! - A `LogContext` publishes its current logger through `ArcSwap` so
//!   hot paths read it without locking
//! - Outputs are append-only; the same sink is never registered twice

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use tracing::level_filters::LevelFilter;
use tracing::Level;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// A shared sink that receives one JSON object per log event.
#[derive(Clone)]
pub struct LogOutput {
    name: Arc<str>,
    writer: SharedWriter,
}

impl LogOutput {
    /// Wrap any writer as a log output.
    pub fn new(name: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Append to the file at `path`, creating it if needed.
    pub fn file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(path.display().to_string(), file))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if both handles point at the same sink.
    pub fn same_sink(&self, other: &LogOutput) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }

    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log output lock poisoned"))?;
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl fmt::Debug for LogOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOutput").field("name", &self.name).finish()
    }
}

/// A logging context value: scope fields, a maximum level and outputs.
#[derive(Debug, Clone)]
pub struct Logger {
    fields: Arc<[(&'static str, String)]>,
    outputs: Arc<[LogOutput]>,
    max_level: LevelFilter,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            fields: Arc::from(Vec::new()),
            outputs: Arc::from(Vec::new()),
            max_level: LevelFilter::INFO,
        }
    }
}

impl Logger {
    pub fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level,
            ..Self::default()
        }
    }

    /// Return a copy carrying one more scope field.
    pub fn with_field(&self, key: &'static str, value: impl fmt::Display) -> Self {
        let mut fields = self.fields.to_vec();
        fields.retain(|(k, _)| *k != key);
        fields.push((key, value.to_string()));
        Self {
            fields: Arc::from(fields),
            ..self.clone()
        }
    }

    /// Return a copy whose outputs are replaced by `outputs`.
    pub fn with_outputs(&self, outputs: &[LogOutput]) -> Self {
        Self {
            outputs: Arc::from(outputs.to_vec()),
            ..self.clone()
        }
    }

    pub fn outputs(&self) -> &[LogOutput] {
        &self.outputs
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    pub fn debug(&self, message: &str) {
        self.event(Level::DEBUG, message, &[]);
    }

    pub fn info(&self, message: &str) {
        self.event(Level::INFO, message, &[]);
    }

    /// Emit an event with extra per-event fields.
    pub fn event(&self, level: Level, message: &str, extra: &[(&str, &dyn fmt::Display)]) {
        if !self.enabled(level) {
            return;
        }

        let fields = ConsoleFields::collect(&self.fields, extra);
        macro_rules! console {
            ($level:expr) => {
                tracing::event!(
                    $level,
                    gate = fields.gate.as_deref(),
                    hostname = fields.hostname.as_deref(),
                    connection = fields.connection.as_deref(),
                    peer = fields.peer.as_deref(),
                    error = fields.error.as_deref(),
                    context = fields.rest.as_deref(),
                    "{}",
                    message
                )
            };
        }
        if level == Level::ERROR {
            console!(Level::ERROR);
        } else if level == Level::WARN {
            console!(Level::WARN);
        } else if level == Level::INFO {
            console!(Level::INFO);
        } else if level == Level::DEBUG {
            console!(Level::DEBUG);
        } else {
            console!(Level::TRACE);
        }

        if self.outputs.is_empty() {
            return;
        }

        let line = self.render_json(level, message, extra);
        for output in self.outputs.iter() {
            if let Err(e) = output.write_line(&line) {
                tracing::warn!(output = %output.name(), error = %e, "Failed to write log output");
            }
        }
    }

    fn render_json(&self, level: Level, message: &str, extra: &[(&str, &dyn fmt::Display)]) -> Vec<u8> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut object = Map::new();
        object.insert("time".into(), Value::from(time));
        object.insert("level".into(), Value::from(level.as_str().to_lowercase()));
        for (k, v) in self.fields.iter() {
            object.insert((*k).into(), Value::from(v.clone()));
        }
        for (k, v) in extra {
            object.insert((*k).into(), Value::from(v.to_string()));
        }
        object.insert("message".into(), Value::from(message));

        serde_json::to_vec(&Value::Object(object)).unwrap_or_default()
    }
}

/// Console view of an event: well-known keys as their own `tracing` fields,
/// everything else rendered as `k=v` pairs.
#[derive(Debug, Default, PartialEq)]
struct ConsoleFields {
    gate: Option<String>,
    hostname: Option<String>,
    connection: Option<String>,
    peer: Option<String>,
    error: Option<String>,
    rest: Option<String>,
}

impl ConsoleFields {
    fn collect(scope: &[(&'static str, String)], extra: &[(&str, &dyn fmt::Display)]) -> Self {
        let mut fields = Self::default();
        let mut rest = Vec::new();
        let pairs = scope
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .chain(extra.iter().map(|(k, v)| (*k, v.to_string())));
        // Per-event values come last and win over scope values.
        for (key, value) in pairs {
            let slot = match key {
                "gate" => &mut fields.gate,
                "hostname" => &mut fields.hostname,
                "connection" => &mut fields.connection,
                "peer" => &mut fields.peer,
                "error" => &mut fields.error,
                _ => {
                    rest.push(format!("{}={}", key, value));
                    continue;
                }
            };
            *slot = Some(value);
        }
        if !rest.is_empty() {
            fields.rest = Some(rest.join(" "));
        }
        fields
    }
}

struct ContextState {
    base: Logger,
    outputs: Vec<LogOutput>,
}

/// A component's mutable logging state.
///
/// Holds the outputs registered on the component and the logger it was last
/// given; the published logger is the base logger with the component's
/// scope fields and outputs applied.
pub struct LogContext {
    scope: Vec<(&'static str, String)>,
    state: Mutex<ContextState>,
    current: ArcSwap<Logger>,
}

impl LogContext {
    pub fn new(base: Logger) -> Self {
        Self::scoped(base, Vec::new())
    }

    /// Create a context whose logger always carries `scope` fields.
    pub fn scoped(base: Logger, scope: Vec<(&'static str, String)>) -> Self {
        let current = Self::compose(&base, &scope, &[]);
        Self {
            scope,
            state: Mutex::new(ContextState {
                base,
                outputs: Vec::new(),
            }),
            current: ArcSwap::from_pointee(current),
        }
    }

    /// The currently published logger.
    pub fn logger(&self) -> Arc<Logger> {
        self.current.load_full()
    }

    pub fn outputs(&self) -> Vec<LogOutput> {
        self.lock().outputs.clone()
    }

    /// Register another output and republish the logger.
    pub fn add_output(&self, output: LogOutput) -> Arc<Logger> {
        self.add_outputs(std::slice::from_ref(&output))
    }

    pub fn add_outputs(&self, outputs: &[LogOutput]) -> Arc<Logger> {
        let mut state = self.lock();
        for output in outputs {
            if !state.outputs.iter().any(|o| o.same_sink(output)) {
                state.outputs.push(output.clone());
            }
        }
        self.publish(&state)
    }

    /// Replace the base logger, keeping this component's outputs and scope.
    pub fn override_logger(&self, base: &Logger) -> Arc<Logger> {
        let mut state = self.lock();
        state.base = base.clone();
        self.publish(&state)
    }

    fn publish(&self, state: &ContextState) -> Arc<Logger> {
        let logger = Arc::new(Self::compose(&state.base, &self.scope, &state.outputs));
        self.current.store(logger.clone());
        logger
    }

    fn compose(base: &Logger, scope: &[(&'static str, String)], outputs: &[LogOutput]) -> Logger {
        let mut logger = base.with_outputs(outputs);
        for (k, v) in scope {
            logger = logger.with_field(*k, v);
        }
        logger
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ContextState> {
        // A poisoned guard still holds consistent data: every write is a
        // single push or assignment.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("scope", &self.scope)
            .field("outputs", &self.lock().outputs.len())
            .finish()
    }
}
