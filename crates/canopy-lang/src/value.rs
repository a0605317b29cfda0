//! Nested parameter values
//!
//! Code parameters, discovery parameters, and cluster configs are trees of
//! scalars, maps, and lists. Maps are ordered so that serialization is
//! deterministic. String leaves may contain `{{ .Path }}` templates and are
//! rendered with a structural fold.

use crate::template::{TemplateCache, TemplateContext, TemplateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A nested parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// An empty map value.
    pub fn empty_map() -> Value {
        Value::Map(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Child lookup for maps; `None` for any other shape.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Scalar rendering used when a value is substituted into text.
    ///
    /// Maps and lists render as empty, matching unresolved template paths.
    pub fn as_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => x.to_string(),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => String::new(),
        }
    }

    /// Render all string leaves as templates against `ctx`.
    ///
    /// Non-string scalars pass through untouched; maps and lists recurse.
    pub fn render(
        &self,
        ctx: &TemplateContext,
        cache: &TemplateCache,
    ) -> Result<Value, TemplateError> {
        match self {
            Value::String(s) => {
                let template = cache.get_or_compile(s)?;
                Ok(Value::String(template.render(ctx)))
            }
            Value::List(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(item.render(ctx, cache)?);
                }
                Ok(Value::List(rendered))
            }
            Value::Map(entries) => {
                let mut rendered = BTreeMap::new();
                for (k, v) in entries {
                    rendered.insert(k.clone(), v.render(ctx, cache)?);
                }
                Ok(Value::Map(rendered))
            }
            other => Ok(other.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<V: Into<Value>> FromIterator<(String, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}
