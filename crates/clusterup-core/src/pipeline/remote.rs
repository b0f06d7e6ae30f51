//! Replicating generated configuration to a remote engine host.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::paths::HostLayout;
use crate::task::ContainerTask;

const MIRROR_MOUNT: &str = "/mirror";

/// Copy the local directory `name` to its mirrored path on the engine host.
///
/// Runs a throwaway container with the host path bind-mounted and the
/// directory's files injected under the mount.
pub async fn mirror(engine: &Arc<dyn ContainerEngine>, layout: &HostLayout, name: &str, image: &str) -> Result<()> {
    let files = collect_files(&layout.local_dir(name), MIRROR_MOUNT)?;
    tracing::info!(dir = name, files = files.len(), host = %layout.host_dir(name).display(), "copying to engine host");

    let mut task = ContainerTask::new(image)
        .bind(layout.bind(name, MIRROR_MOUNT, Some("z")))
        .entrypoint(["/bin/true"]);
    for (path, data) in files {
        task = task.file(path, data);
    }
    task.run(engine).await?;
    Ok(())
}

/// Every regular file under `root`, keyed by `prefix/<relative path>`.
pub fn collect_files(root: &Path, prefix: &str) -> Result<BTreeMap<String, Bytes>> {
    let mut files = BTreeMap::new();
    collect_into(root, root, prefix.trim_end_matches('/'), &mut files)?;
    Ok(files)
}

fn collect_into(root: &Path, dir: &Path, prefix: &str, out: &mut BTreeMap<String, Bytes>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_into(root, &path, prefix, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = format!("{prefix}/{}", rel.display());
            out.insert(key, Bytes::from(std::fs::read(&path)?));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use tempfile::TempDir;

    #[test]
    fn collects_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("certs")).unwrap();
        std::fs::write(dir.path().join("node-config.yaml"), "kind: NodeConfig").unwrap();
        std::fs::write(dir.path().join("certs/ca.crt"), "pem").unwrap();

        let files = collect_files(dir.path(), "/mirror/").unwrap();
        assert_eq!(
            files.keys().collect::<Vec<_>>(),
            vec!["/mirror/certs/ca.crt", "/mirror/node-config.yaml"]
        );
    }

    #[tokio::test]
    async fn mirror_binds_remote_path_and_uploads() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("node")).unwrap();
        std::fs::write(dir.path().join("node/node-config.yaml"), "kind: NodeConfig").unwrap();

        let fake = FakeEngine::remote();
        let engine: Arc<dyn ContainerEngine> = fake.clone();
        let layout = HostLayout::new(dir.path(), true);
        mirror(&engine, &layout, "node", "origin-cli:v3.11").await.unwrap();

        let spec = &fake.created_specs()[0];
        assert_eq!(spec.binds, vec!["/var/lib/clusterup/node:/mirror:z"]);
        assert_eq!(
            fake.uploaded_file(0, "/mirror/node-config.yaml").as_deref(),
            Some("kind: NodeConfig")
        );
    }
}
