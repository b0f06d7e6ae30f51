//! Local manifest parsing and template processing.
//!
//! Templates are `template.openshift.io/v1` `Template` documents: a list of
//! `objects` and a list of `parameters`. Processing substitutes `${NAME}`
//! inside string values and replaces a value that is exactly `${{NAME}}`
//! with the parameter parsed as YAML, so numbers and booleans keep their type.

use kube::api::DynamicObject;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::ClusterError;

static PARAM_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid regex"));
static TYPED_PARAM_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{\{([A-Za-z0-9_]+)\}\}$").expect("valid regex"));

/// Parse one or more YAML documents into objects, flattening `List` kinds.
pub fn parse_manifest(data: &[u8]) -> Result<Vec<DynamicObject>, ClusterError> {
    let mut values = Vec::new();
    for doc in serde_yaml::Deserializer::from_slice(data) {
        let value = Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        flatten_into(value, &mut values);
    }
    values.into_iter().map(to_object).collect()
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|k| k == "List" || (k.ends_with("List") && value.get("items").is_some()));
    if is_list {
        if let Some(Value::Array(items)) = value.get("items").cloned() {
            for item in items {
                flatten_into(item, out);
            }
        }
    } else {
        out.push(value);
    }
}

fn to_object(value: Value) -> Result<DynamicObject, ClusterError> {
    let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();
    let api_version = value.get("apiVersion").and_then(Value::as_str).unwrap_or_default();
    if kind.is_empty() || api_version.is_empty() {
        return Err(ClusterError::InvalidManifest(
            "object without apiVersion or kind".to_string(),
        ));
    }
    let named = value
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .is_some_and(|n| !n.is_empty());
    if !named {
        return Err(ClusterError::InvalidManifest(format!(
            "{kind} without metadata.name"
        )));
    }
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TemplateDoc {
    kind: String,
    #[serde(default)]
    objects: Vec<Value>,
    #[serde(default)]
    parameters: Vec<Parameter>,
}

#[derive(Debug, Deserialize)]
struct Parameter {
    name: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    required: bool,
}

/// Resolve template parameters from `supplied` and the template defaults.
/// Supplied values the template does not declare are ignored.
pub fn resolve_parameters(
    data: &[u8],
    supplied: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ClusterError> {
    let doc = parse_template(data)?;
    resolve(&doc.parameters, supplied)
}

fn parse_template(data: &[u8]) -> Result<TemplateDoc, ClusterError> {
    let doc: TemplateDoc = serde_yaml::from_slice(data)?;
    if doc.kind != "Template" {
        return Err(ClusterError::InvalidManifest(format!(
            "expected a Template, found {}",
            doc.kind
        )));
    }
    Ok(doc)
}

fn resolve(
    parameters: &[Parameter],
    supplied: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ClusterError> {
    let mut resolved = BTreeMap::new();
    for p in parameters {
        let value = supplied
            .get(&p.name)
            .cloned()
            .or_else(|| p.value.clone())
            .unwrap_or_default();
        if p.required && value.is_empty() {
            return Err(ClusterError::MissingParameter(p.name.clone()));
        }
        resolved.insert(p.name.clone(), value);
    }
    Ok(resolved)
}

/// Render a template into the objects it describes.
pub fn process_template(
    data: &[u8],
    supplied: &BTreeMap<String, String>,
) -> Result<Vec<DynamicObject>, ClusterError> {
    let doc = parse_template(data)?;
    let params = resolve(&doc.parameters, supplied)?;
    let mut objects = Vec::new();
    for obj in doc.objects {
        flatten_into(substitute(obj, &params)?, &mut objects);
    }
    objects.into_iter().map(to_object).collect()
}

fn substitute(value: Value, params: &BTreeMap<String, String>) -> Result<Value, ClusterError> {
    Ok(match value {
        Value::String(s) => {
            if let Some(caps) = TYPED_PARAM_REF.captures(&s) {
                if let Some(v) = params.get(&caps[1]) {
                    return Ok(serde_yaml::from_str(v)?);
                }
            }
            Value::String(
                PARAM_REF
                    .replace_all(&s, |caps: &regex::Captures<'_>| {
                        params
                            .get(&caps[1])
                            .cloned()
                            .unwrap_or_else(|| caps[0].to_string())
                    })
                    .into_owned(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| substitute(v, params))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| Ok((k, substitute(v, params)?)))
                .collect::<Result<_, ClusterError>>()?,
        ),
        other => other,
    })
}
