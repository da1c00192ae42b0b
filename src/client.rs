//! Flag client wrapper.
//!
//! `FlagClient` owns an external evaluator and decorates every call with the
//! running service's context. It also watches flag updates for two naming
//! conventions: `allow-eap-<program>` announces an early access program and
//! `config-<name>` carries application configuration.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::context::{Context, SingleContext};
use crate::errors::{ContextError, Result};
use crate::identity::{with_service, ServiceInfo};
use crate::kind::Kind;
use crate::verbosity::{LevelHandle, Verbosity, LOG_VERBOSITY_FLAG};

pub const EAP_PREFIX: &str = "allow-eap-";
pub const CONFIG_PREFIX: &str = "config-";
pub const GLOBAL_PREFIX: &str = "global-";

/// Component name stamped on contexts built by `variation`.
const APP_COMPONENT: &str = "app";

/// The external flag evaluator. Evaluation semantics live behind this trait.
pub trait FlagEvaluator: Send + Sync {
    /// The value of `flag` for `context`, or `None` when the flag is unknown.
    fn evaluate(&self, flag: &str, context: &Context) -> Option<Value>;

    /// Whether the evaluator has data to serve. Fallbacks are used until it does.
    fn initialized(&self) -> bool {
        true
    }
}

/// Fixed flag values, the same for every context.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    values: HashMap<String, Value>,
}

impl StaticFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON object mapping flag keys to values.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self { values: map.into_iter().collect() }),
            _ => Err(ContextError::invalid("flag values must be a JSON object")),
        }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(s)?)
    }

    pub fn with(mut self, flag: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(flag.into(), value.into());
        self
    }

    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl FlagEvaluator for StaticFlags {
    fn evaluate(&self, flag: &str, _context: &Context) -> Option<Value> {
        self.values.get(flag).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Evaluated,
    /// The evaluator had no value for the flag.
    Fallback,
    /// The evaluator is not initialized yet.
    NotReady,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detail {
    pub value: Value,
    pub reason: Reason,
}

/// An explicitly owned handle around a flag evaluator.
pub struct FlagClient {
    evaluator: Arc<dyn FlagEvaluator>,
    service: ServiceInfo,
    level_handle: Option<Box<dyn LevelHandle>>,
    verbosity: RwLock<Verbosity>,
    early_access: RwLock<BTreeSet<String>>,
    config: RwLock<Map<String, Value>>,
}

impl FlagClient {
    pub fn new(evaluator: Arc<dyn FlagEvaluator>, service: ServiceInfo) -> Self {
        Self {
            evaluator,
            service,
            level_handle: None,
            verbosity: RwLock::new(Verbosity::default()),
            early_access: RwLock::new(BTreeSet::new()),
            config: RwLock::new(Map::new()),
        }
    }

    /// Apply flag-driven verbosity changes through `handle`.
    pub fn with_level_handle(mut self, handle: impl LevelHandle + 'static) -> Self {
        self.level_handle = Some(Box::new(handle));
        self
    }

    pub fn service(&self) -> &ServiceInfo {
        &self.service
    }

    /// Evaluate `flag` for `context` merged with this service's context.
    pub fn variation(&self, flag: &str, context: impl Into<Context>, fallback: Value) -> Result<Value> {
        Ok(self.variation_detail(flag, context, fallback)?.value)
    }

    pub fn variation_detail(
        &self,
        flag: &str,
        context: impl Into<Context>,
        fallback: Value,
    ) -> Result<Detail> {
        let merged = Context::from(with_service(&self.service, APP_COMPONENT, [context.into()])?);
        Ok(self.detail_for(flag, &merged, fallback))
    }

    fn detail_for(&self, flag: &str, context: &Context, fallback: Value) -> Detail {
        let detail = self.detail_quiet(flag, context, fallback);
        match detail.reason {
            Reason::NotReady => warn!(flag, "evaluator not initialized, serving fallback"),
            Reason::Fallback => debug!(flag, "no value for flag, serving fallback"),
            Reason::Evaluated => {}
        }
        detail
    }

    /// `detail_for` without logging, for use while a log entry is being filtered.
    fn detail_quiet(&self, flag: &str, context: &Context, fallback: Value) -> Detail {
        if !self.evaluator.initialized() {
            return Detail { value: fallback, reason: Reason::NotReady };
        }
        match self.evaluator.evaluate(flag, context) {
            Some(value) => Detail { value, reason: Reason::Evaluated },
            None => Detail { value: fallback, reason: Reason::Fallback },
        }
    }

    /// The log verbosity `config-log-verbosity` resolves to for `context`.
    ///
    /// `default` is used when the evaluator is not initialized, has no value,
    /// or serves something that is not a level name.
    pub fn verbosity_for(&self, context: &Context, default: Verbosity) -> Verbosity {
        match self.resolve_verbosity(context) {
            Some(Ok(v)) => v,
            Some(Err(value)) => {
                warn!(flag = LOG_VERBOSITY_FLAG, %value, "invalid log verbosity, using default");
                default
            }
            None => default,
        }
    }

    /// Whether an entry at `entry` logged for `context` passes the verbosity
    /// resolved for that context. Never logs.
    pub fn allows(&self, context: &Context, entry: Verbosity, default: Verbosity) -> bool {
        let resolved = match self.resolve_verbosity(context) {
            Some(Ok(v)) => v,
            _ => default,
        };
        resolved.allows(entry)
    }

    fn resolve_verbosity(&self, context: &Context) -> Option<std::result::Result<Verbosity, Value>> {
        let detail = self.detail_quiet(LOG_VERBOSITY_FLAG, context, Value::Null);
        if detail.reason != Reason::Evaluated {
            return None;
        }
        Some(match detail.value.as_str().map(Verbosity::parse) {
            Some(Ok(v)) => Ok(v),
            _ => Err(detail.value),
        })
    }

    /// Evaluate several flags for one context.
    pub fn variation_map<I, K>(&self, context: impl Into<Context>, flags: I) -> Result<Map<String, Value>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let context = context.into();
        flags
            .into_iter()
            .map(|(flag, fallback)| {
                let flag: String = flag.into();
                let value = self.variation(&flag, context.clone(), fallback)?;
                Ok::<_, ContextError>((flag, value))
            })
            .collect()
    }

    /// React to a flag changing upstream.
    pub fn handle_update(&self, flag: &str) -> Result<()> {
        if let Some(program) = flag.strip_prefix(EAP_PREFIX) {
            debug!(program, "discovered early access program");
            write(&self.early_access).insert(program.to_string());
        } else if let Some(key) = flag.strip_prefix(CONFIG_PREFIX) {
            self.handle_configuration(flag, key)?;
        }
        Ok(())
    }

    /// Configuration flags are evaluated for the `app-config` service context
    /// alone, without the running service merged in.
    fn handle_configuration(&self, flag: &str, key: &str) -> Result<()> {
        let config_context =
            Context::from(SingleContext::new(Kind::Service, "app-config")?.with("anonymous", true));

        if flag == LOG_VERBOSITY_FLAG {
            let current = *read(&self.verbosity);
            let fallback = Value::String(current.name().into());
            let value = self.detail_for(flag, &config_context, fallback).value;
            let verbosity = match value.as_str().map(Verbosity::parse) {
                Some(Ok(v)) => v,
                _ => {
                    error!(flag, %value, "invalid configuration value");
                    return Ok(());
                }
            };
            if let Some(handle) = &self.level_handle {
                handle.apply(verbosity)?;
            }
            *write(&self.verbosity) = verbosity;
            debug!(level = %verbosity, "set logging level");
        } else if let Some(name) = key.strip_prefix(GLOBAL_PREFIX) {
            let previous = read(&self.config).get(name).cloned().unwrap_or(Value::Null);
            let value = self.detail_for(flag, &config_context, previous).value;
            debug!(name, %value, "set global config");
            write(&self.config).insert(name.to_string(), value);
        }
        Ok(())
    }

    pub fn verbosity(&self) -> Verbosity {
        *read(&self.verbosity)
    }

    /// Every early access program seen so far.
    pub fn early_access_programs(&self) -> Vec<String> {
        read(&self.early_access).iter().cloned().collect()
    }

    /// The early access programs `context` may opt in to.
    pub fn available_early_access_programs(&self, context: impl Into<Context>) -> Result<Vec<String>> {
        let context = context.into();
        let mut allowed = Vec::new();
        for program in self.early_access_programs() {
            let flag = format!("{EAP_PREFIX}{program}");
            if self.variation(&flag, context.clone(), Value::Bool(false))? == Value::Bool(true) {
                allowed.push(program);
            }
        }
        Ok(allowed)
    }

    /// Snapshot of the `config-global-*` values.
    pub fn config(&self) -> Map<String, Value> {
        read(&self.config).clone()
    }

    /// End the client's lifetime. Nothing is buffered, so this only logs.
    pub fn shutdown(self) {
        debug!(service = %self.service.display_name(), "flag client shut down");
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the context it was asked about.
    #[derive(Default)]
    struct Recording {
        flags: StaticFlags,
        seen: Mutex<Vec<Value>>,
        ready: bool,
    }

    impl FlagEvaluator for Recording {
        fn evaluate(&self, flag: &str, context: &Context) -> Option<Value> {
            self.seen.lock().unwrap().push(context.to_value());
            self.flags.evaluate(flag, context)
        }

        fn initialized(&self) -> bool {
            self.ready
        }
    }

    fn client(flags: StaticFlags) -> FlagClient {
        FlagClient::new(Arc::new(flags), ServiceInfo::new("demo", "1.0.0", "host"))
    }

    fn user() -> SingleContext {
        SingleContext::new(Kind::User, "u1").unwrap()
    }

    #[test]
    fn variation_adds_service_context() {
        let rec = Arc::new(Recording { flags: StaticFlags::new().with("f", true), ready: true, ..Default::default() });
        let client = FlagClient::new(rec.clone(), ServiceInfo::new("demo", "1.0.0", "host"));
        assert_eq!(client.variation("f", user(), json!(false)).unwrap(), json!(true));

        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen[0]["kind"], json!("multi"));
        assert_eq!(seen[0]["user"]["key"], json!("u1"));
        assert_eq!(seen[0]["service"]["component"], json!("app"));
    }

    #[test]
    fn fallback_reasons() {
        let c = client(StaticFlags::new());
        let d = c.variation_detail("missing", user(), json!(7)).unwrap();
        assert_eq!(d, Detail { value: json!(7), reason: Reason::Fallback });

        let not_ready = FlagClient::new(Arc::new(Recording::default()), ServiceInfo::new("d", "1", "h"));
        let d = not_ready.variation_detail("f", user(), json!("x")).unwrap();
        assert_eq!(d.reason, Reason::NotReady);
    }

    #[test]
    fn service_kind_in_caller_context_is_a_conflict() {
        let c = client(StaticFlags::new());
        let svc = SingleContext::new(Kind::Service, "other").unwrap();
        assert!(matches!(
            c.variation("f", svc, json!(null)),
            Err(ContextError::DuplicateKind { .. })
        ));
    }

    #[test]
    fn variation_map_collects_values() {
        let c = client(StaticFlags::new().with("a", 1).with("b", "on"));
        let out = c
            .variation_map(user(), [("a", json!(0)), ("b", json!("off")), ("c", json!(false))])
            .unwrap();
        assert_eq!(Value::Object(out), json!({"a": 1, "b": "on", "c": false}));
    }

    #[test]
    fn early_access_programs_are_discovered_and_filtered() {
        let c = client(
            StaticFlags::new()
                .with("allow-eap-dark-mode", true)
                .with("allow-eap-beta-api", false),
        );
        c.handle_update("allow-eap-dark-mode").unwrap();
        c.handle_update("allow-eap-beta-api").unwrap();
        c.handle_update("unrelated").unwrap();
        assert_eq!(c.early_access_programs(), vec!["beta-api", "dark-mode"]);
        assert_eq!(c.available_early_access_programs(user()).unwrap(), vec!["dark-mode"]);
    }

    #[test]
    fn global_config_is_stored() {
        let c = client(StaticFlags::new().with("config-global-max-items", 50));
        c.handle_update("config-global-max-items").unwrap();
        c.handle_update("config-not-global").unwrap();
        assert_eq!(Value::Object(c.config()), json!({"max-items": 50}));
    }

    struct Capture(Arc<Mutex<Vec<Verbosity>>>);

    impl LevelHandle for Capture {
        fn apply(&self, verbosity: Verbosity) -> Result<()> {
            self.0.lock().unwrap().push(verbosity);
            Ok(())
        }
    }

    #[test]
    fn log_verbosity_flag_applies_level() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let c = client(StaticFlags::new().with(LOG_VERBOSITY_FLAG, "debug"))
            .with_level_handle(Capture(applied.clone()));
        c.handle_update(LOG_VERBOSITY_FLAG).unwrap();
        assert_eq!(c.verbosity().name(), "debug");
        assert_eq!(applied.lock().unwrap().as_slice(), &[Verbosity::parse("debug").unwrap()]);
    }

    #[test]
    fn invalid_verbosity_is_ignored() {
        let c = client(StaticFlags::new().with(LOG_VERBOSITY_FLAG, "loud"));
        c.handle_update(LOG_VERBOSITY_FLAG).unwrap();
        assert_eq!(c.verbosity(), Verbosity::WARN);
    }

    #[test]
    fn verbosity_for_falls_back_to_default() {
        let ctx = Context::from(user());
        let debug = Verbosity::parse("debug").unwrap();

        let c = client(StaticFlags::new().with(LOG_VERBOSITY_FLAG, "info"));
        assert_eq!(c.verbosity_for(&ctx, debug).name(), "info");
        assert!(c.allows(&ctx, Verbosity::parse("notice").unwrap(), debug));
        assert!(!c.allows(&ctx, debug, debug));

        let invalid = client(StaticFlags::new().with(LOG_VERBOSITY_FLAG, 3));
        assert_eq!(invalid.verbosity_for(&ctx, debug), debug);

        let unset = client(StaticFlags::new());
        assert_eq!(unset.verbosity_for(&ctx, Verbosity::WARN), Verbosity::WARN);

        let not_ready = FlagClient::new(Arc::new(Recording::default()), ServiceInfo::new("d", "1", "h"));
        assert_eq!(not_ready.verbosity_for(&ctx, debug), debug);
    }

    #[test]
    fn static_flags_from_json() {
        let flags = StaticFlags::from_json(r#"{"a": true}"#).unwrap();
        assert_eq!(flags.flags().collect::<Vec<_>>(), vec!["a"]);
        assert!(StaticFlags::from_json("[1]").is_err());
    }
}
