//! Text templates used for allocation keys, code and discovery parameters
//!
//! A template is plain text with `{{ ... }}` actions. An action is either a
//! dotted path into the contextual data (`{{ .User.Name }}`), a quoted literal,
//! or `default <fallback> <value>` which yields the fallback when the value is
//! missing, empty or false.

use crate::error::{PolicyError, Result};
use crate::params::NestedParameterMap;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// A compiled template
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone)]
enum Part {
    Text(String),
    Action(Action),
}

#[derive(Debug, Clone)]
enum Action {
    Arg(Arg),
    Default { fallback: Arg, value: Option<Arg> },
}

#[derive(Debug, Clone)]
enum Arg {
    Literal(String),
    Path(Vec<String>),
}

impl Template {
    /// Compiles a template string
    pub fn compile(source: &str) -> Result<Self> {
        let err = |reason: String| PolicyError::TemplateCompile {
            template: source.to_string(),
            reason,
        };

        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| err("unclosed action".into()))?;
            parts.push(Part::Action(parse_action(after[..end].trim()).map_err(err)?));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns true if the template contains no actions
    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Text(_)))
    }

    /// Evaluates the template against contextual data
    pub fn evaluate(&self, data: &Value) -> Result<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Action(action) => {
                    let value = eval_action(action, data).ok_or_else(|| {
                        PolicyError::TemplateEvaluation {
                            template: self.source.clone(),
                            reason: "<no value>".into(),
                        }
                    })?;
                    out.push_str(&render(&value));
                }
            }
        }
        Ok(out)
    }
}

fn parse_action(body: &str) -> std::result::Result<Action, String> {
    let words = split_words(body)?;
    match words.as_slice() {
        [] => Err("empty action".into()),
        [single] => Ok(Action::Arg(parse_arg(single)?)),
        [func, args @ ..] if func == "default" => match args {
            [fallback] => Ok(Action::Default {
                fallback: parse_arg(fallback)?,
                value: None,
            }),
            [fallback, value] => Ok(Action::Default {
                fallback: parse_arg(fallback)?,
                value: Some(parse_arg(value)?),
            }),
            _ => Err("default expects one or two arguments".into()),
        },
        [func, ..] => Err(format!("function \"{}\" not defined", func)),
    }
}

fn split_words(body: &str) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' || c == '\'' {
            chars.next();
            let mut word = String::from(c);
            loop {
                match chars.next() {
                    Some(q) if q == c => break,
                    Some(other) => word.push(other),
                    None => return Err("unterminated quoted string".into()),
                }
            }
            words.push(word);
            continue;
        }
        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            word.push(c);
            chars.next();
        }
        words.push(word);
    }
    Ok(words)
}

fn parse_arg(word: &str) -> std::result::Result<Arg, String> {
    if let Some(rest) = word.strip_prefix('"').or_else(|| word.strip_prefix('\'')) {
        return Ok(Arg::Literal(rest.to_string()));
    }
    if word == "." {
        return Ok(Arg::Path(Vec::new()));
    }
    match word.strip_prefix('.') {
        Some(path) => {
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            if segments.iter().any(String::is_empty) {
                return Err(format!("bad path '{}'", word));
            }
            Ok(Arg::Path(segments))
        }
        None => Err(format!("unexpected \"{}\" in action", word)),
    }
}

fn eval_arg(arg: &Arg, data: &Value) -> Option<Value> {
    match arg {
        Arg::Literal(s) => Some(Value::String(s.clone())),
        Arg::Path(segments) => {
            let path: Vec<&str> = segments.iter().map(String::as_str).collect();
            crate::params::lookup(data, &path)
                .filter(|v| !v.is_null())
                .cloned()
        }
    }
}

fn eval_action(action: &Action, data: &Value) -> Option<Value> {
    match action {
        Action::Arg(arg) => eval_arg(arg, data),
        Action::Default { fallback, value } => {
            let fallback = eval_arg(fallback, data);
            let value = match value {
                Some(v) => eval_arg(v, data),
                None => return fallback.or_else(|| Some(Value::String(String::new()))),
            };
            match value {
                Some(v) if !is_empty_value(&v) => Some(v),
                _ => fallback,
            }
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Thread-safe cache of compiled templates
#[derive(Debug, Default)]
pub struct TemplateCache {
    compiled: DashMap<String, Arc<Template>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled template, compiling and caching it on first use
    pub fn get(&self, source: &str) -> Result<Arc<Template>> {
        if let Some(t) = self.compiled.get(source) {
            return Ok(t.clone());
        }
        let template = Arc::new(Template::compile(source)?);
        self.compiled.insert(source.to_string(), template.clone());
        Ok(template)
    }

    pub fn evaluate(&self, source: &str, data: &Value) -> Result<String> {
        self.get(source)?.evaluate(data)
    }

    /// Evaluates every string leaf of a parameter tree as a template.
    ///
    /// Non-string leaves are copied as is.
    pub fn evaluate_tree(
        &self,
        params: &NestedParameterMap,
        data: &Value,
    ) -> Result<NestedParameterMap> {
        let mut result = NestedParameterMap::new();
        for (name, value) in params {
            let evaluated = match value {
                Value::String(source) => Value::String(self.evaluate(source, data)?),
                Value::Object(inner) => Value::Object(self.evaluate_tree(inner, data)?),
                other => other.clone(),
            };
            result.insert(name.clone(), evaluated);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({
            "User": {"Name": "alice", "Labels": {"team": "platform"}},
            "Discovery": {"db": {"url": "db.local:5432"}},
            "Labels": {"empty": ""},
        })
    }

    #[test]
    fn test_paths_and_text() {
        let t = Template::compile("team-{{ .User.Labels.team }}/{{.User.Name}}").unwrap();
        assert_eq!(t.evaluate(&data()).unwrap(), "team-platform/alice");
    }

    #[test]
    fn test_missing_value_fails() {
        let t = Template::compile("{{ .User.Missing }}").unwrap();
        let err = t.evaluate(&data()).unwrap_err();
        assert!(err.to_string().contains("<no value>"));
    }

    #[test]
    fn test_default_function() {
        let t = Template::compile("{{ default \"none\" .Labels.empty }}").unwrap();
        assert_eq!(t.evaluate(&data()).unwrap(), "none");

        let t = Template::compile("{{ default \"none\" .Discovery.db.url }}").unwrap();
        assert_eq!(t.evaluate(&data()).unwrap(), "db.local:5432");

        let t = Template::compile("{{ default \"x\" .Labels.absent }}").unwrap();
        assert_eq!(t.evaluate(&data()).unwrap(), "x");
    }

    #[test]
    fn test_static_template() {
        let t = Template::compile("plain").unwrap();
        assert!(t.is_static());
        assert_eq!(t.evaluate(&json!({})).unwrap(), "plain");
    }

    #[test]
    fn test_evaluate_tree() {
        let params = json!({
            "name": "{{ .User.Name }}",
            "replicas": 3,
            "db": {"url": "{{ .Discovery.db.url }}"}
        });
        let cache = TemplateCache::new();
        let result = cache
            .evaluate_tree(params.as_object().unwrap(), &data())
            .unwrap();
        assert_eq!(
            Value::Object(result),
            json!({"name": "alice", "replicas": 3, "db": {"url": "db.local:5432"}})
        );
    }

    #[test]
    fn test_compile_errors() {
        assert!(Template::compile("{{ .User.Name").is_err());
        assert!(Template::compile("{{ unknown .User }}").is_err());
        assert!(Template::compile("{{ }}").is_err());
    }
}
