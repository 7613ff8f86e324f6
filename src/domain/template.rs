//! Runtime template compilation.
//!
//! Page sources are authored as plain text with `{{ dotted.path }}`
//! placeholders that pull values out of a JSON render context. Compilation
//! happens once per source change; rendering is a pure function of the
//! context, so a compiled [`Template`] can be shared freely and invoked
//! from any thread.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },
}

impl TemplateError {
    fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    /// Dotted lookup path, already split into components.
    Placeholder(Vec<String>),
}

/// A compiled render function: an immutable segment list produced by
/// [`Template::compile`].
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

impl Template {
    /// Compile raw template source.
    ///
    /// Fails with [`TemplateError::Syntax`] on an unterminated or empty
    /// placeholder, or a placeholder containing characters outside
    /// `[A-Za-z0-9_.-]`. A syntax error is an authoring defect; callers keep
    /// serving the previously compiled template.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find(OPEN) {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + OPEN.len()..];
            let close = after_open.find(CLOSE).ok_or_else(|| {
                TemplateError::syntax(offset + open, "unterminated placeholder")
            })?;

            let raw = &after_open[..close];
            let path = parse_path(raw, offset + open)?;
            segments.push(Segment::Placeholder(path));

            let consumed = open + OPEN.len() + close + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Render against a JSON context. Deterministic and side-effect free;
    /// missing paths render as the empty string.
    pub fn render(&self, context: &Value) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(path) => {
                    if let Some(value) = lookup(context, path) {
                        push_value(&mut out, value);
                    }
                }
            }
        }
        out
    }
}

fn parse_path(raw: &str, offset: usize) -> Result<Vec<String>, TemplateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TemplateError::syntax(offset, "empty placeholder"));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(TemplateError::syntax(
            offset,
            format!("invalid character `{bad}` in placeholder `{trimmed}`"),
        ));
    }

    let components: Vec<String> = trimmed.split('.').map(str::to_string).collect();
    if components.iter().any(String::is_empty) {
        return Err(TemplateError::syntax(
            offset,
            format!("empty path component in placeholder `{trimmed}`"),
        ));
    }
    Ok(components)
}

fn lookup<'a>(context: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = context;
    for component in path {
        current = match current {
            Value::Object(map) => map.get(component)?,
            Value::Array(items) => items.get(component.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(_) | Value::Number(_) => out.push_str(&value.to_string()),
        // Structured values render in compact JSON form so client-side
        // scripts can consume them directly.
        Value::Array(_) | Value::Object(_) => {
            out.push_str(&serde_json::to_string(value).unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn literal_source_passes_through() {
        let template = Template::compile("<h1>Pool</h1>").expect("compiles");
        assert_eq!(template.render(&json!({})), "<h1>Pool</h1>");
    }

    #[test]
    fn substitutes_nested_paths() {
        let template = Template::compile("miners: {{ stats.miner_count }}").expect("compiles");
        let context = json!({"stats": {"miner_count": 42}});
        assert_eq!(template.render(&context), "miners: 42");
    }

    #[test]
    fn array_indexing() {
        let template = Template::compile("{{ coins.0 }}").expect("compiles");
        assert_eq!(template.render(&json!({"coins": ["ltc", "doge"]})), "ltc");
    }

    #[test]
    fn missing_path_renders_empty() {
        let template = Template::compile("[{{ absent.value }}]").expect("compiles");
        assert_eq!(template.render(&json!({})), "[]");
    }

    #[test]
    fn structured_values_render_as_json() {
        let template = Template::compile("var stats = {{ stats }};").expect("compiles");
        let context = json!({"stats": {"hashrate": 9000}});
        assert_eq!(template.render(&context), r#"var stats = {"hashrate":9000};"#);
    }

    #[test]
    fn unterminated_placeholder_is_syntax_error() {
        let err = Template::compile("before {{ stats.count").expect_err("must fail");
        assert!(matches!(err, TemplateError::Syntax { offset: 7, .. }));
    }

    #[test]
    fn empty_placeholder_is_syntax_error() {
        assert!(Template::compile("{{   }}").is_err());
    }

    #[test]
    fn invalid_character_is_syntax_error() {
        assert!(Template::compile("{{ stats[0] }}").is_err());
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = Template::compile("{{ a }}/{{ b.c }}").expect("compiles");
        let context = json!({"a": "x", "b": {"c": 7}});
        assert_eq!(template.render(&context), template.render(&context));
    }
}
