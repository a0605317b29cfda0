//! String templates with `{{ .Path.To.Value }}` substitution
//!
//! Templates are compiled once and cached by source text. Rendering looks
//! paths up in a structured context; unresolved paths yield the empty
//! string, while malformed templates fail at compile time.

use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Template compilation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("template syntax error in '{source_text}': {message}")]
pub struct TemplateError {
    pub source_text: String,
    pub message: String,
}

impl TemplateError {
    fn new(source_text: &str, message: impl Into<String>) -> Self {
        Self {
            source_text: source_text.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Path(Vec<String>),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Compile template text.
    pub fn compile(source: &str) -> Result<Template, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if !rest[..open].is_empty() {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or_else(|| TemplateError::new(source, "unclosed '{{'"))?;
            let path = parse_path(source, after_open[..close].trim())?;
            segments.push(Segment::Path(path));
            rest = &after_open[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Template {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against a context. Unresolved paths yield the empty string.
    pub fn render(&self, ctx: &TemplateContext) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Path(path) => {
                    if let Some(value) = ctx.lookup(path) {
                        out.push_str(&value.as_text());
                    }
                }
            }
        }
        out
    }
}

fn parse_path(source: &str, expr: &str) -> Result<Vec<String>, TemplateError> {
    let Some(stripped) = expr.strip_prefix('.') else {
        return Err(TemplateError::new(
            source,
            format!("expected a '.'-prefixed path, found '{expr}'"),
        ));
    };

    let mut path = Vec::new();
    for part in stripped.split('.') {
        if part.is_empty() {
            return Err(TemplateError::new(source, "empty path segment"));
        }
        if !part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TemplateError::new(
                source,
                format!("invalid path segment '{part}'"),
            ));
        }
        path.push(part.to_string());
    }
    Ok(path)
}

/// Structured rendering context.
///
/// Top-level entries are addressed by the first path segment; nested maps
/// descend by key and lists by numeric segment (`.Keys.0`).
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    root: BTreeMap<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.root.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    fn lookup(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(first)?;
        for step in rest {
            current = match current {
                Value::Map(entries) => entries.get(step)?,
                Value::List(items) => items.get(step.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Process-wide cache of compiled templates, keyed by source text.
#[derive(Debug, Default)]
pub struct TemplateCache {
    compiled: RwLock<HashMap<String, Arc<Template>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, source: &str) -> Result<Arc<Template>, TemplateError> {
        if let Some(found) = self.compiled.read().unwrap().get(source) {
            return Ok(found.clone());
        }
        let template = Arc::new(Template::compile(source)?);
        self.compiled
            .write()
            .unwrap()
            .insert(source.to_string(), template.clone());
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext::new()
            .with(
                "Claim",
                [("Id".to_string(), Value::from("main/web-claim"))]
                    .into_iter()
                    .collect::<Value>(),
            )
            .with(
                "Labels",
                [("env".to_string(), Value::from("dev"))]
                    .into_iter()
                    .collect::<Value>(),
            )
            .with(
                "Keys",
                Value::List(vec![Value::from("k0"), Value::from("k1")]),
            )
    }

    #[test]
    fn renders_paths_and_text() {
        let t = Template::compile("svc-{{ .Labels.env }}-{{ .Claim.Id }}").unwrap();
        assert_eq!(t.render(&ctx()), "svc-dev-main/web-claim");
    }

    #[test]
    fn unresolved_paths_render_empty() {
        let t = Template::compile("x{{ .Labels.missing }}y{{ .Nope.at.all }}z").unwrap();
        assert_eq!(t.render(&ctx()), "xyz");
    }

    #[test]
    fn list_indexing() {
        let t = Template::compile("{{ .Keys.1 }}").unwrap();
        assert_eq!(t.render(&ctx()), "k1");
    }

    #[test]
    fn plain_text_passes_through() {
        let t = Template::compile("no placeholders").unwrap();
        assert_eq!(t.render(&ctx()), "no placeholders");
    }

    #[test]
    fn syntax_errors() {
        assert!(Template::compile("{{ .Unclosed").is_err());
        assert!(Template::compile("{{ bare }}").is_err());
        assert!(Template::compile("{{ . }}").is_err());
        assert!(Template::compile("{{ .a..b }}").is_err());
    }

    #[test]
    fn cache_reuses_compiled_templates() {
        let cache = TemplateCache::new();
        let a = cache.get_or_compile("{{ .Labels.env }}").unwrap();
        let b = cache.get_or_compile("{{ .Labels.env }}").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
