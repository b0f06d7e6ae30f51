//! Tearing a cluster down and reporting on a running one.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cluster::ClusterApi;
use crate::engine::{ContainerEngine, ContainerSummary, EngineError};
use crate::error::Result;
use crate::pipeline::{ETCD_CONTAINER, KUBELET_CONTAINER};
use crate::state::ClusterState;

// ---------------------------------------------------------------------------
// down
// ---------------------------------------------------------------------------

/// Stop and remove every managed container, the kubelet first so it cannot
/// restart the pods it owns. Returns the names removed.
pub async fn down(engine: &dyn ContainerEngine) -> Result<Vec<String>> {
    let mut containers = engine.list_managed().await?;
    containers.sort_by_key(teardown_rank);

    let mut removed = Vec::with_capacity(containers.len());
    for c in containers {
        if c.state == "running" {
            ignore_missing(engine.stop(&c.id).await)?;
        }
        ignore_missing(engine.remove(&c.id).await)?;
        tracing::info!(container = %c.name, "removed");
        removed.push(c.name);
    }
    Ok(removed)
}

fn teardown_rank(c: &ContainerSummary) -> u8 {
    match c.name.as_str() {
        KUBELET_CONTAINER => 0,
        ETCD_CONTAINER => 2,
        _ => 1,
    }
}

fn ignore_missing(result: std::result::Result<(), EngineError>) -> std::result::Result<(), EngineError> {
    match result {
        Err(EngineError::NotFound(_)) => Ok(()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub base_dir: PathBuf,
    pub initialized: bool,
    /// Kubelet container status, `None` when it does not exist.
    pub kubelet: Option<String>,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub components: Vec<String>,
}

impl StatusReport {
    pub fn running(&self) -> bool {
        self.kubelet.as_deref() == Some("running")
    }
}

/// Gather what is known about the cluster in `base`. `cluster` is probed for
/// health when given; a probe error counts as unhealthy.
pub async fn status(
    engine: &dyn ContainerEngine,
    base: &Path,
    cluster: Option<&dyn ClusterApi>,
    api_port: u16,
) -> Result<StatusReport> {
    let state = ClusterState::load_optional(base)?;
    let kubelet = engine.inspect(KUBELET_CONTAINER).await?.map(|s| s.status);

    let healthy = match cluster {
        Some(api) if kubelet.is_some() => match api.probe("/healthz").await {
            Ok(code) => code == 200,
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        },
        _ => false,
    };

    Ok(StatusReport {
        base_dir: base.to_path_buf(),
        initialized: state.is_some(),
        kubelet,
        healthy,
        server_url: state.as_ref().map(|s| s.server_url(api_port)),
        components: state.map(|s| s.components).unwrap_or_default(),
    })
}
