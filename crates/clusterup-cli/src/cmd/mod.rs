pub mod add;
pub mod down;
pub mod status;
pub mod up;

use anyhow::Context;
use clusterup_core::cluster::{ClusterApi, KubeCluster};
use clusterup_core::engine::{ContainerEngine, DockerEngine};
use clusterup_core::paths;
use clusterup_core::Fatal;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// Drive an async command to completion on a fresh runtime.
pub fn block_on<F>(fut: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    rt.block_on(fut)
}

pub fn connect_engine() -> anyhow::Result<Arc<dyn ContainerEngine>> {
    let engine = DockerEngine::connect().map_err(|e| {
        Fatal::new("cannot connect to the container engine")
            .with_cause(e)
            .with_solution("make sure the engine daemon is running and DOCKER_HOST is correct")
    })?;
    Ok(Arc::new(engine))
}

/// Client for the cluster whose admin kubeconfig lives under `base`.
pub async fn connect_cluster(base: &Path) -> anyhow::Result<Arc<dyn ClusterApi>> {
    let path = paths::admin_kubeconfig_path(base);
    let data = std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let cluster = KubeCluster::from_kubeconfig(&data)
        .await
        .context("failed to build cluster client")?;
    Ok(Arc::new(cluster))
}
