//! Log verbosity driven by a flag value.
//!
//! Levels follow the syslog ordering: a lower rank is more severe. An entry is
//! emitted when the active verbosity's rank is at least the entry's rank.

use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::subscriber::Interest;
use tracing::{Event, Level, Metadata};
use tracing_subscriber::layer::{self, Filter};
use tracing_subscriber::reload;

use crate::client::FlagClient;
use crate::context::Context;
use crate::errors::{ContextError, Result};

/// Flag that carries the verbosity level name.
pub const LOG_VERBOSITY_FLAG: &str = "config-log-verbosity";

/// Event field holding the JSON context an entry was logged for.
pub const CONTEXT_FIELD: &str = "ld_context";

const LEVELS: &[(&str, i8)] = &[
    ("user", -1),
    ("emerg", 0),
    ("alert", 1),
    ("crit", 2),
    ("error", 3),
    ("warn", 4),
    ("notice", 5),
    ("info", 6),
    ("debug", 7),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verbosity {
    name: &'static str,
    rank: i8,
}

impl Verbosity {
    pub const WARN: Verbosity = Verbosity { name: "warn", rank: 4 };

    pub fn parse(name: &str) -> Result<Verbosity> {
        LEVELS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(name, rank)| Verbosity { name, rank })
            .ok_or_else(|| ContextError::InvalidLevel(name.to_string()))
    }

    /// The rank a `tracing` event level is filtered at. `TRACE` counts as `debug`.
    pub fn from_level(level: &Level) -> Verbosity {
        let name = if *level == Level::ERROR {
            "error"
        } else if *level == Level::WARN {
            "warn"
        } else if *level == Level::INFO {
            "info"
        } else {
            "debug"
        };
        LEVELS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(name, rank)| Verbosity { name, rank })
            .unwrap_or(Verbosity::WARN)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rank(&self) -> i8 {
        self.rank
    }

    /// Whether an entry logged at `entry` passes this verbosity.
    pub fn allows(&self, entry: Verbosity) -> bool {
        self.rank >= entry.rank
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self.rank {
            r if r < 0 => LevelFilter::OFF,
            0..=3 => LevelFilter::ERROR,
            4 => LevelFilter::WARN,
            5 | 6 => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::WARN
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Somewhere a new verbosity can be applied, typically a subscriber reload handle.
pub trait LevelHandle: Send + Sync {
    fn apply(&self, verbosity: Verbosity) -> Result<()>;
}

impl<S: 'static> LevelHandle for reload::Handle<LevelFilter, S> {
    fn apply(&self, verbosity: Verbosity) -> Result<()> {
        self.reload(verbosity.level_filter())
            .map_err(|e| ContextError::LevelReload { level: verbosity.to_string(), reason: e.to_string() })
    }
}

/// Per-layer filter that drops events above the verbosity resolved for the
/// context they were logged for.
///
/// An event names its context through the `ld_context` field as a JSON string;
/// events without one, or with one that does not parse, use the default context.
pub struct FlagLevelFilter {
    client: Arc<FlagClient>,
    default_context: Context,
    default_level: Verbosity,
}

impl FlagLevelFilter {
    pub fn new(client: Arc<FlagClient>, default_context: impl Into<Context>, default_level: Verbosity) -> Self {
        Self { client, default_context: default_context.into(), default_level }
    }

    /// Whether an entry at `level` logged for the JSON `context` passes.
    pub fn allows_entry(&self, level: &Level, context: Option<&str>) -> bool {
        let entry = Verbosity::from_level(level);
        let parsed = context.and_then(|raw| Context::from_json(raw).ok());
        let context = parsed.as_ref().unwrap_or(&self.default_context);
        self.client.allows(context, entry, self.default_level)
    }
}

impl<S> Filter<S> for FlagLevelFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &layer::Context<'_, S>) -> bool {
        true
    }

    fn callsite_enabled(&self, _meta: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &layer::Context<'_, S>) -> bool {
        let mut field = ContextField::default();
        event.record(&mut field);
        self.allows_entry(event.metadata().level(), field.0.as_deref())
    }
}

#[derive(Default)]
struct ContextField(Option<String>);

impl Visit for ContextField {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == CONTEXT_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == CONTEXT_FIELD {
            self.0 = Some(format!("{value:?}"));
        }
    }
}
