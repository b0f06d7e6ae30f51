//! Container engine boundary.
//!
//! Everything the bootstrapper needs from the engine goes through
//! [`ContainerEngine`]. [`DockerEngine`] talks to a Docker-compatible daemon;
//! tests substitute an in-memory double.

pub mod archive;
mod docker;

pub use docker::DockerEngine;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::image::PullPolicy;

/// Label attached to every container this tool creates.
pub const MANAGED_LABEL: &str = "io.clusterup.managed";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container engine {op} failed: {source}")]
    Api {
        op: &'static str,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("archive error: {0}")]
    Archive(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub(crate) fn api(op: &'static str) -> impl FnOnce(bollard::errors::Error) -> Self {
        move |source| EngineError::Api { op, source }
    }
}

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub env: Vec<String>,
    /// `host:container[:opts]`
    pub binds: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub privileged: bool,
    pub host_network: bool,
    pub host_pid: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub running: bool,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// The subset of daemon information preflight and proxy checks look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonInfo {
    pub root_dir: String,
    pub insecure_registry_cidrs: Vec<String>,
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
    pub security_options: Vec<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a container and return its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Extract a tar archive into the container filesystem at `/`.
    async fn upload(&self, id: &str, archive: Bytes) -> Result<(), EngineError>;

    async fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Block until the container exits and return its exit code.
    async fn wait(&self, id: &str) -> Result<i64, EngineError>;

    async fn logs(&self, id: &str) -> Result<CapturedOutput, EngineError>;

    /// Tar archive of `path` inside the container.
    async fn download(&self, id: &str, path: &str) -> Result<Bytes, EngineError>;

    async fn stop(&self, id: &str) -> Result<(), EngineError>;

    async fn remove(&self, id: &str) -> Result<(), EngineError>;

    /// `None` when no container with that name or id exists.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, EngineError>;

    /// Every container, running or not, carrying [`MANAGED_LABEL`] or whose
    /// name starts with `k8s_`.
    async fn list_managed(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn ensure_image(&self, image: &str, policy: PullPolicy) -> Result<(), EngineError>;

    async fn info(&self) -> Result<DaemonInfo, EngineError>;

    /// Whether bind-mount host paths live on another machine.
    fn is_remote(&self) -> bool;
}
