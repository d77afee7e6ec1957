//! Template evaluation against the runtime state.
//!
//! Templates use Jinja syntax (`{{ response.StatusCode }}`) rendered by a shared `minijinja`
//! environment running in strict mode, so referencing a missing key is an error instead of an
//! empty substitution. The functions available in templates are registered in
//! [`super::builtins`].

use super::{builtins, error::ParseError, parser, value::Value};
use crate::engine::State;
use indexmap::IndexMap;
use minijinja::{
    escape_formatter, value::ValueKind, Environment, Output, State as TemplateState,
    UndefinedBehavior, Value as TemplateValue,
};
use once_cell::sync::Lazy;
use std::fmt::Write as _;
use thiserror::Error;

static ENV: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.set_formatter(json_formatter);
    builtins::register(&mut env);
    env
});

/// Writes booleans, none, sequences and maps in their JSON form so that rendered output
/// can be parsed back as a value or embedded into JSON bodies.
fn json_formatter(
    out: &mut Output,
    state: &TemplateState,
    value: &TemplateValue,
) -> Result<(), minijinja::Error> {
    match value.kind() {
        ValueKind::Bool | ValueKind::None | ValueKind::Seq | ValueKind::Map => {
            let json = serde_json::to_string(value).map_err(|err| {
                minijinja::Error::new(
                    minijinja::ErrorKind::BadSerialization,
                    "value can not be written as JSON",
                )
                .with_source(err)
            })?;
            out.write_str(&json)?;
            Ok(())
        }
        _ => escape_formatter(out, state, value),
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("executing template failed: {0}")]
    Render(#[from] minijinja::Error),
    #[error("failed parsing placeholder output '{output}': {source}")]
    Value {
        output: String,
        #[source]
        source: ParseError,
    },
}

/// Renders `raw` without post processing.
pub fn render(raw: &str, state: &State) -> Result<String, TemplateError> {
    Ok(ENV.render_str(raw, state)?)
}

/// Renders `raw` and unescapes `\{` and `\}` in the output.
pub fn apply(raw: &str, state: &State) -> Result<String, TemplateError> {
    let out = render(raw, state)?;
    Ok(unescape_delims(&out))
}

/// Evaluates the body of a `{{ ... }}` placeholder and parses the output as a value, so a
/// placeholder producing `123` yields an integer and one producing `"abc"` yields the string
/// `abc`.
pub fn apply_placeholder(raw: &str, state: &State) -> Result<Value, TemplateError> {
    let output = render(&format!("{{{{{raw}}}}}"), state)?;
    parser::parse_value(&output).map_err(|source| TemplateError::Value { output, source })
}

pub fn apply_to_map(map: &mut IndexMap<String, Value>, state: &State) -> Result<(), TemplateError> {
    for value in map.values_mut() {
        apply_to_value(value, state)?;
    }
    Ok(())
}

pub fn apply_to_array(items: &mut [Value], state: &State) -> Result<(), TemplateError> {
    for item in items.iter_mut() {
        apply_to_value(item, state)?;
    }
    Ok(())
}

fn apply_to_value(value: &mut Value, state: &State) -> Result<(), TemplateError> {
    match value {
        Value::String(s) => *s = apply(s, state)?,
        Value::Placeholder(raw) => *value = apply_placeholder(raw, state)?,
        Value::Array(items) => apply_to_array(items, state)?,
        Value::Integer(_) | Value::Float(_) | Value::Bool(_) => {}
    }
    Ok(())
}

fn unescape_delims(s: &str) -> String {
    s.replace("\\{", "{").replace("\\}", "}")
}
