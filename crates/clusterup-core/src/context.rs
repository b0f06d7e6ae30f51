use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cluster::ClusterApi;
use crate::config::TimeoutPolicy;
use crate::error::Result;
use crate::image::{ImageTemplate, PullPolicy};

/// How an install plan reaches the cluster.
#[derive(Clone, Default)]
pub enum ApplyMode {
    /// Render a shell script and run it inside the client image.
    #[default]
    Container,
    /// Issue typed API calls in-process.
    Api(Arc<dyn ClusterApi>),
}

impl fmt::Debug for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyMode::Container => f.write_str("Container"),
            ApplyMode::Api(_) => f.write_str("Api"),
        }
    }
}

/// Read-only settings shared by every component of one install batch.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub admin_kubeconfig: Bytes,
    pub base_dir: PathBuf,
    pub client_image: String,
    pub image_template: ImageTemplate,
    /// Verbosity of client commands run in apply containers.
    pub log_level: u8,
    /// Verbosity passed to the cluster services components deploy.
    pub server_log_level: u8,
    pub pull_policy: PullPolicy,
    pub timeouts: TimeoutPolicy,
    pub apply_mode: ApplyMode,
}

impl InstallContext {
    /// Build a context whose client image is the template's `cli` image.
    pub fn new(
        admin_kubeconfig: impl Into<Bytes>,
        base_dir: impl Into<PathBuf>,
        image_template: ImageTemplate,
    ) -> Result<Self> {
        let client_image = image_template.expand("cli")?;
        Ok(Self {
            admin_kubeconfig: admin_kubeconfig.into(),
            base_dir: base_dir.into(),
            client_image,
            image_template,
            log_level: 0,
            server_log_level: 0,
            pull_policy: PullPolicy::default(),
            timeouts: TimeoutPolicy::default(),
            apply_mode: ApplyMode::default(),
        })
    }

    pub fn with_log_level(mut self, level: u8) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_server_log_level(mut self, level: u8) -> Self {
        self.server_log_level = level;
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_apply_mode(mut self, mode: ApplyMode) -> Self {
        self.apply_mode = mode;
        self
    }

    pub fn image(&self, component: &str) -> Result<String> {
        self.image_template.expand(component)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
