use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{ClusterUpError, Result};

pub const DEFAULT_IMAGE_FORMAT: &str = "docker.io/openshift/origin-${component}:${version}";
pub const DEFAULT_VERSION: &str = "v3.11";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Substitute `${key}` placeholders from `values`.
///
/// When `strict` is set, any placeholder without a value is an error naming
/// every such key; otherwise unresolved placeholders are left in place.
pub fn expand(template: &str, values: &BTreeMap<&str, &str>, strict: bool) -> Result<String> {
    let mut missing = Vec::new();
    let out = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match values.get(key) {
            Some(v) => v.to_string(),
            None => {
                if !missing.iter().any(|m: &String| m.as_str() == key) {
                    missing.push(key.to_string());
                }
                caps[0].to_string()
            }
        }
    });
    if strict && !missing.is_empty() {
        return Err(ClusterUpError::UnresolvedKeys {
            template: template.to_string(),
            keys: missing,
        });
    }
    Ok(out.into_owned())
}

// ---------------------------------------------------------------------------
// ImageTemplate
// ---------------------------------------------------------------------------

/// Image reference format with a `${component}` placeholder, e.g.
/// `docker.io/openshift/origin-${component}:v3.11`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageTemplate(String);

impl Default for ImageTemplate {
    fn default() -> Self {
        Self(DEFAULT_IMAGE_FORMAT.to_string())
    }
}

impl ImageTemplate {
    pub fn new(format: impl Into<String>) -> Self {
        Self(format.into())
    }

    /// Pre-expand `${version}`, leaving every other placeholder untouched.
    pub fn with_version(&self, version: Option<&str>) -> Result<Self> {
        let version = version.unwrap_or(DEFAULT_VERSION);
        let values = BTreeMap::from([("version", version)]);
        Ok(Self(expand(&self.0, &values, false)?))
    }

    /// Image reference for `component`. Fails if any other placeholder remains.
    pub fn expand(&self, component: &str) -> Result<String> {
        let values = BTreeMap::from([("component", component)]);
        expand(&self.0, &values, true)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PullPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    #[default]
    Always,
    IfNotPresent,
    Never,
}

impl PullPolicy {
    /// A pinned tag means images can be reused once pulled.
    pub fn for_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(t) if !t.is_empty() => PullPolicy::IfNotPresent,
            _ => PullPolicy::Always,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
