//! Workflow templates.
//!
//! A template is a JSON document with `param_<key>` placeholders. Each
//! payload value is substituted textually, then the result is parsed.

use std::path::Path;

use anyhow::{Context, anyhow, bail};
use serde_json::{Map, Value};

/// Characters of substituted text quoted when it fails to parse.
const EXCERPT_CHARS: usize = 300;

/// Loads `<dir>/<key>.json` and substitutes `payload` into it.
pub async fn build_job_spec(
    dir: &Path,
    workflow_key: &str,
    payload: &Map<String, Value>,
) -> anyhow::Result<Value> {
    if workflow_key.is_empty()
        || workflow_key.contains(['/', '\\'])
        || workflow_key.starts_with('.')
    {
        bail!("invalid workflow key: {workflow_key:?}");
    }
    let path = dir.join(format!("{workflow_key}.json"));
    let template = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("workflow template not found: {}", path.display()))?;
    parse_substituted(workflow_key, &substitute(&template, payload))
}

/// Replaces every `param_<key>` with the rendered payload value.
///
/// Longer keys go first so `param_seed_2` is not clobbered by `param_seed`.
pub fn substitute(template: &str, payload: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = payload.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut text = template.to_string();
    for key in keys {
        let placeholder = format!("param_{key}");
        if text.contains(&placeholder) {
            text = text.replace(&placeholder, &render(&payload[key.as_str()]));
        }
    }
    text
}

/// Numbers and null verbatim; anything else as an escaped string body.
fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => escape(s),
        other => escape(&other.to_string()),
    }
}

/// JSON string escaping without the surrounding quotes.
fn escape(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn parse_substituted(workflow_key: &str, text: &str) -> anyhow::Result<Value> {
    serde_json::from_str(text).map_err(|e| {
        let excerpt: String = text.chars().take(EXCERPT_CHARS).collect();
        anyhow!("workflow {workflow_key} is not valid JSON after substitution ({e}): {excerpt}")
    })
}
