//! Template rendering utilities using Tera
//!
//! Profile fields (namespaces, selectors, service names) are small templates
//! rendered against the run's target. Go-style `{{ .target }}` placeholders
//! are accepted alongside native Tera syntax.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

use crate::{Error, Result};

lazy_static! {
    static ref DEFAULT_DOUBLE_QUOTED: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+"([^"]+)"\s*\}\}"#).unwrap();
    static ref DEFAULT_SINGLE_QUOTED: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+'([^']+)'\s*\}\}"#).unwrap();
    static ref DEFAULT_BARE: Regex = Regex::new(r#"\{\{([^}]+)\|\s*default\s+([^}\s(]+)\s*\}\}"#).unwrap();
}

/// Convert Go template syntax to Tera syntax
///
/// - `{{ .target }}` -> `{{ target }}`
/// - `{{ .namespace | default "default" }}` -> `{{ namespace | default(value="default")}}`
pub fn convert_go_to_tera(template: &str) -> String {
    let converted = template.replace("{{ .", "{{ ").replace("{{.", "{{");
    let converted = DEFAULT_DOUBLE_QUOTED.replace_all(&converted, "{{$1| default(value=\"$2\")}}");
    let converted = DEFAULT_SINGLE_QUOTED.replace_all(&converted, "{{$1| default(value=\"$2\")}}");
    DEFAULT_BARE
        .replace_all(&converted, "{{$1| default(value=\"$2\")}}")
        .to_string()
}

/// Render `template` with the top-level keys of `context` as variables.
pub fn render(template: &str, context: &Value) -> Result<String> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }

    let converted = convert_go_to_tera(template);

    let mut tera_context = Context::new();
    match context {
        Value::Object(map) => {
            for (key, value) in map {
                tera_context.insert(key, value);
            }
        }
        other => tera_context.insert("data", other),
    }

    Tera::one_off(&converted, &tera_context, false)
        .map_err(|e| Error::Template(format!("failed to render '{}': {}", template, e)))
}
