//! Evaluation contexts: single-kind attribute bags and their multi-kind composite.
//!
//! On the wire a context is a JSON object with a `kind` discriminator. A single
//! context carries its attributes (including `key`) next to `kind`; a multi
//! context nests one object per kind under that kind's name.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::{ContextError, Result};
use crate::kind::Kind;

const KIND_FIELD: &str = "kind";
const KEY_FIELD: &str = "key";

/// One entity: a kind plus its attributes, with the `kind` field held apart.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleContext {
    kind: Kind,
    attributes: Map<String, Value>,
}

impl SingleContext {
    /// Create a context of `kind` identified by `key`.
    pub fn new(kind: Kind, key: impl Into<String>) -> Result<Self> {
        let mut ctx = Self::from_attributes(kind, Map::new())?;
        ctx.attributes.insert(KEY_FIELD.into(), Value::String(key.into()));
        Ok(ctx)
    }

    /// Wrap an attribute map. A stray `kind` entry in `attributes` is dropped.
    ///
    /// The kind is normalized first, so `Kind::Other("user")` is stored as
    /// `Kind::User`; `multi`, `kind` and the empty string are rejected.
    pub fn from_attributes(kind: Kind, mut attributes: Map<String, Value>) -> Result<Self> {
        let kind = kind.normalize()?;
        if kind.is_multi() {
            return Err(ContextError::invalid("a single context cannot have kind `multi`"));
        }
        attributes.remove(KIND_FIELD);
        Ok(Self { kind, attributes })
    }

    /// For crate constructors whose kind is a fixed known variant.
    pub(crate) fn from_known(kind: Kind, mut attributes: Map<String, Value>) -> Self {
        debug_assert!(!kind.is_multi() && !matches!(kind, Kind::Other(_)));
        attributes.remove(KIND_FIELD);
        Self { kind, attributes }
    }

    /// Builder-style attribute setter. Setting `kind` is ignored.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        if name != KIND_FIELD {
            self.attributes.insert(name, value.into());
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.attributes.get(KEY_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Flat JSON form: `kind` first, then the attributes.
    pub fn to_value(&self) -> Value {
        let mut out = Map::with_capacity(self.attributes.len() + 1);
        out.insert(KIND_FIELD.into(), Value::String(self.kind.to_string()));
        out.extend(self.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(out)
    }
}

/// A composite of single contexts holding at most one entry per kind.
///
/// Entries keep insertion order. Equality ignores that order.
#[derive(Debug, Clone, Default)]
pub struct MultiContext {
    entries: Vec<SingleContext>,
}

impl MultiContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `ctx`, failing if its kind is already present.
    pub fn insert(&mut self, ctx: SingleContext) -> Result<()> {
        if self.contains(ctx.kind()) {
            return Err(ContextError::DuplicateKind { kind: ctx.kind().to_string() });
        }
        self.entries.push(ctx);
        Ok(())
    }

    /// Add `ctx`, replacing an existing entry of the same kind in place.
    /// Returns the replaced entry.
    pub fn replace(&mut self, ctx: SingleContext) -> Option<SingleContext> {
        match self.entries.iter_mut().find(|e| e.kind() == ctx.kind()) {
            Some(slot) => Some(std::mem::replace(slot, ctx)),
            None => {
                self.entries.push(ctx);
                None
            }
        }
    }

    pub fn get(&self, kind: &Kind) -> Option<&SingleContext> {
        self.entries.iter().find(|e| e.kind() == kind)
    }

    pub fn contains(&self, kind: &Kind) -> bool {
        self.get(kind).is_some()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Kind> {
        self.entries.iter().map(SingleContext::kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SingleContext> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_contexts(self) -> Vec<SingleContext> {
        self.entries
    }

    /// `{"kind":"multi", "<kind>": {attributes}, ...}`
    pub fn to_value(&self) -> Value {
        let mut out = Map::with_capacity(self.entries.len() + 1);
        out.insert(KIND_FIELD.into(), Value::String(Kind::Multi.to_string()));
        for e in &self.entries {
            out.insert(e.kind().to_string(), Value::Object(e.attributes().clone()));
        }
        Value::Object(out)
    }
}

impl PartialEq for MultiContext {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.entries.iter().all(|e| other.get(e.kind()) == Some(e))
    }
}

/// Either shape of context accepted by the merger.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    Single(SingleContext),
    Multi(MultiContext),
}

impl Context {
    /// Parse a JSON context. A missing or null `kind` defaults to `user`.
    pub fn from_value(value: Value) -> Result<Context> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(ContextError::invalid(format!(
                    "context must be a JSON object, got {}",
                    type_name(&other)
                )))
            }
        };
        let kind = match fields.remove(KIND_FIELD) {
            None | Some(Value::Null) => Kind::User,
            Some(Value::String(s)) => Kind::parse(&s)?,
            Some(other) => {
                return Err(ContextError::invalid(format!(
                    "`kind` must be a string, got {}",
                    type_name(&other)
                )))
            }
        };
        if !kind.is_multi() {
            return SingleContext::from_attributes(kind, fields).map(Context::Single);
        }

        let mut multi = MultiContext::new();
        for (name, nested) in fields {
            let kind = Kind::parse(&name)?;
            let attributes = match nested {
                Value::Object(attributes) => attributes,
                other => {
                    return Err(ContextError::invalid(format!(
                        "multi context entry `{name}` must be an object, got {}",
                        type_name(&other)
                    )))
                }
            };
            if let Some(inner) = attributes.get(KIND_FIELD).and_then(Value::as_str) {
                if inner != name {
                    return Err(ContextError::invalid(format!(
                        "multi context entry `{name}` declares kind `{inner}`"
                    )));
                }
            }
            multi.insert(SingleContext::from_attributes(kind, attributes)?)?;
        }
        Ok(Context::Multi(multi))
    }

    /// Parse a JSON string into a context.
    pub fn from_json(s: &str) -> Result<Context> {
        Context::from_value(serde_json::from_str(s)?)
    }

    pub fn kind(&self) -> Kind {
        match self {
            Context::Single(s) => s.kind().clone(),
            Context::Multi(_) => Kind::Multi,
        }
    }

    /// The `(kind, attributes)` entries this context contributes to a merge.
    pub fn into_singles(self) -> Vec<SingleContext> {
        match self {
            Context::Single(s) => vec![s],
            Context::Multi(m) => m.into_contexts(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Context::Single(s) => s.to_value(),
            Context::Multi(m) => m.to_value(),
        }
    }
}

impl From<SingleContext> for Context {
    fn from(s: SingleContext) -> Self {
        Context::Single(s)
    }
}

impl From<MultiContext> for Context {
    fn from(m: MultiContext) -> Self {
        Context::Multi(m)
    }
}

impl TryFrom<Value> for Context {
    type Error = ContextError;

    fn try_from(value: Value) -> Result<Self> {
        Context::from_value(value)
    }
}

impl From<&Context> for Value {
    fn from(ctx: &Context) -> Self {
        ctx.to_value()
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Context::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for MultiContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
