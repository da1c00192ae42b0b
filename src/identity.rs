//! Constructors for the identity contexts an application attaches to evaluations.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::context::{Context, MultiContext, SingleContext};
use crate::errors::Result;
use crate::kind::Kind;
use crate::merge::merge;

const SCHEMA_VERSION: &str = "1.0.0";

/// Who is running: the service identity stamped into service contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub hostname: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), hostname: hostname.into() }
    }

    /// This crate's package name and version, host from `$HOSTNAME`.
    pub fn current() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), hostname)
    }

    /// Stable key: hex SHA-256 of `name-version`.
    pub fn key(&self) -> String {
        sha256_hex(&format!("{}-{}", self.name, self.version))
    }

    pub fn display_name(&self) -> String {
        format!("{} - v{}", self.name, self.version)
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn random_key() -> Value {
    Value::String(Uuid::new_v4().to_string())
}

/// Build a single context of `kind` from `defaults` overlaid with `attributes`.
fn layered(kind: Kind, defaults: Map<String, Value>, attributes: Map<String, Value>) -> SingleContext {
    let mut merged = defaults;
    merged.extend(attributes);
    SingleContext::from_known(kind, merged)
}

/// The running service, tagged with the component doing the evaluation.
pub fn service_context(info: &ServiceInfo, component: &str) -> SingleContext {
    let cpu_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut attributes = Map::new();
    attributes.insert("key".into(), json!(info.key()));
    attributes.insert("name".into(), json!(info.display_name()));
    attributes.insert("id".into(), json!(info.name));
    attributes.insert("version".into(), json!(info.version));
    attributes.insert("hostname".into(), json!(info.hostname));
    attributes.insert("component".into(), json!(component));
    attributes.insert("schemaVersion".into(), json!(SCHEMA_VERSION));
    attributes.insert(
        "os".into(),
        json!({
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "family": std::env::consts::FAMILY,
            "cpuCount": cpu_count,
        }),
    );
    layered(Kind::Service, attributes, Map::new())
}

/// An anonymous end-user session with a fresh random key.
pub fn session_context(attributes: Map<String, Value>) -> SingleContext {
    anonymous(Kind::Session, attributes)
}

/// An anonymous request or transaction without an end user.
pub fn request_context(attributes: Map<String, Value>) -> SingleContext {
    anonymous(Kind::Request, attributes)
}

fn anonymous(kind: Kind, attributes: Map<String, Value>) -> SingleContext {
    let mut defaults = Map::new();
    defaults.insert("anonymous".into(), Value::Bool(true));
    defaults.insert("key".into(), random_key());
    layered(kind, defaults, attributes)
}

/// A background job. Keeps a supplied `key`, otherwise generates one.
pub fn job_context(attributes: Map<String, Value>) -> SingleContext {
    let mut defaults = Map::new();
    defaults.insert("key".into(), random_key());
    layered(Kind::Job, defaults, attributes)
}

/// A user. Fills in a random `key` when missing and a gravatar `avatar` when an
/// `email` is known but no avatar is.
pub fn user_context(user: Map<String, Value>) -> SingleContext {
    let mut defaults = Map::new();
    if !user.contains_key("key") {
        defaults.insert("key".into(), random_key());
    }
    if !user.contains_key("avatar") {
        if let Some(email) = user.get("email").and_then(Value::as_str).filter(|e| !e.is_empty()) {
            defaults.insert("avatar".into(), Value::String(gravatar_url(email)));
        }
    }
    layered(Kind::User, defaults, user)
}

pub fn gravatar_url(email: &str) -> String {
    let hash = sha256_hex(&email.trim().to_lowercase());
    format!("https://www.gravatar.com/avatar/{hash}?d=robohash&f=y")
}

/// Prepend the service context for `component` to `contexts` and merge.
pub fn with_service<I>(info: &ServiceInfo, component: &str, contexts: I) -> Result<MultiContext>
where
    I: IntoIterator,
    I::Item: Into<Context>,
{
    let service = Context::from(service_context(info, component));
    merge(std::iter::once(service).chain(contexts.into_iter().map(Into::into)))
}

/// Merge a fresh anonymous session into `context`.
pub fn with_session(context: impl Into<Context>) -> Result<MultiContext> {
    merge([Context::from(session_context(Map::new())), context.into()])
}
