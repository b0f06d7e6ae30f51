use crate::error::{ClusterUpError, Result};
use crate::image::{ImageTemplate, PullPolicy, DEFAULT_IMAGE_FORMAT};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ClusterState
// ---------------------------------------------------------------------------

/// What `up` decided, recorded for `add` and `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub server_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_hostname: Option<String>,
    pub routing_suffix: String,
    pub image_template: ImageTemplate,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub server_log_level: u8,
    #[serde(default)]
    pub components: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ClusterState {
    pub fn new(server_ip: impl Into<String>, image_template: ImageTemplate, pull_policy: PullPolicy) -> Self {
        let server_ip = server_ip.into();
        let now = Utc::now();
        Self {
            version: default_version(),
            routing_suffix: default_routing_suffix(&server_ip),
            server_ip,
            public_hostname: None,
            image_template,
            pull_policy,
            remote: false,
            server_log_level: 0,
            components: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    pub fn load(base: &Path) -> Result<Self> {
        let path = paths::state_path(base);
        if !path.exists() {
            return Err(ClusterUpError::NotInitialized(path));
        }
        let data = std::fs::read_to_string(&path)?;
        let state: ClusterState = serde_yaml::from_str(&data)?;
        Ok(state)
    }

    pub fn load_optional(base: &Path) -> Result<Option<Self>> {
        match Self::load(base) {
            Ok(state) => Ok(Some(state)),
            Err(ClusterUpError::NotInitialized(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, base: &Path) -> Result<()> {
        let path = paths::state_path(base);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // ---------------------------------------------------------------------------
    // Queries and mutations
    // ---------------------------------------------------------------------------

    /// The name clients use to reach the server.
    pub fn public_host(&self) -> &str {
        self.public_hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.server_ip)
    }

    pub fn server_url(&self, api_port: u16) -> String {
        format!("https://{}:{api_port}", self.public_host())
    }

    /// Image template and pull policy for a later install. Without `image`
    /// or `tag` the recorded ones are kept; otherwise `image` (or the default
    /// format) is completed with `tag`.
    pub fn images(&self, image: Option<&str>, tag: Option<&str>) -> Result<(ImageTemplate, PullPolicy)> {
        if image.is_none() && tag.is_none() {
            return Ok((self.image_template.clone(), self.pull_policy));
        }
        let template = ImageTemplate::new(image.unwrap_or(DEFAULT_IMAGE_FORMAT)).with_version(tag)?;
        Ok((template, PullPolicy::for_tag(tag)))
    }

    pub fn add_components<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if !self.components.iter().any(|c| c == name) {
                self.components.push(name.to_string());
            }
        }
        self.last_updated = Utc::now();
    }
}

/// Wildcard DNS suffix resolving to `ip`.
pub fn default_routing_suffix(ip: &str) -> String {
    format!("{ip}.nip.io")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state() -> ClusterState {
        let template = ImageTemplate::default().with_version(None).unwrap();
        ClusterState::new("192.168.64.2", template, PullPolicy::Always)
    }

    #[test]
    fn load_without_file_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ClusterState::load(dir.path()),
            Err(ClusterUpError::NotInitialized(_))
        ));
        assert!(ClusterState::load_optional(dir.path()).unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut s = state();
        s.add_components(["registry", "router"]);
        s.save(dir.path()).unwrap();

        let loaded = ClusterState::load(dir.path()).unwrap();
        assert_eq!(loaded, s);
        assert_eq!(loaded.routing_suffix, "192.168.64.2.nip.io");
    }

    #[test]
    fn add_components_dedups() {
        let mut s = state();
        s.add_components(["registry", "router"]);
        s.add_components(["router", "web-console"]);
        assert_eq!(s.components, vec!["registry", "router", "web-console"]);
    }

    #[test]
    fn images_default_to_recorded_ones() {
        let mut s = state();
        s.image_template = ImageTemplate::new("registry.local/origin-${component}:v3.11.2");
        s.pull_policy = PullPolicy::IfNotPresent;
        assert_eq!(
            s.images(None, None).unwrap(),
            (s.image_template.clone(), PullPolicy::IfNotPresent)
        );
    }

    #[test]
    fn tag_override_pins_version() {
        let s = state();
        let (template, policy) = s.images(None, Some("v3.11.1")).unwrap();
        assert_eq!(template.expand("router").unwrap(), "docker.io/openshift/origin-router:v3.11.1");
        assert_eq!(policy, PullPolicy::IfNotPresent);

        let (template, policy) = s
            .images(Some("quay.io/mirror/${component}:${version}"), None)
            .unwrap();
        assert_eq!(template.expand("cli").unwrap(), "quay.io/mirror/cli:v3.11");
        assert_eq!(policy, PullPolicy::Always);
    }

    #[test]
    fn public_host_prefers_hostname() {
        let mut s = state();
        assert_eq!(s.server_url(8443), "https://192.168.64.2:8443");
        s.public_hostname = Some("dev.example.com".to_string());
        assert_eq!(s.server_url(8443), "https://dev.example.com:8443");
    }
}
