use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_DIR: &str = "clusterup.local";

pub const KUBE_APISERVER_DIR: &str = "kube-apiserver";
pub const NODE_DIR: &str = "node";
pub const KUBE_DNS_DIR: &str = "kube-dns";
pub const STATIC_POD_DIR: &str = "static-pod-manifests";
pub const ETCD_DIR: &str = "etcd";
pub const PV_DIR: &str = "pv";
pub const LOGS_DIR: &str = "logs";
pub const DEVELOPER_DIR: &str = "developer";

pub const CONFIG_FILE: &str = "clusterup.yaml";
pub const STATE_FILE: &str = "cluster-state.yaml";
pub const ADMIN_KUBECONFIG: &str = "admin.kubeconfig";
pub const DEVELOPER_KUBECONFIG: &str = "developer.kubeconfig";

/// Root of the mirrored directory tree on a remote engine host.
pub const REMOTE_BASE_DIR: &str = "/var/lib/clusterup";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(base: &Path) -> PathBuf {
    base.join(CONFIG_FILE)
}

pub fn state_path(base: &Path) -> PathBuf {
    base.join(STATE_FILE)
}

pub fn admin_kubeconfig_path(base: &Path) -> PathBuf {
    base.join(KUBE_APISERVER_DIR).join(ADMIN_KUBECONFIG)
}

pub fn developer_kubeconfig_path(base: &Path) -> PathBuf {
    base.join(DEVELOPER_DIR).join(DEVELOPER_KUBECONFIG)
}

pub fn logs_dir(base: &Path) -> PathBuf {
    base.join(LOGS_DIR)
}

/// Flatten a component name into a single file-name segment.
pub fn flatten_name(name: &str) -> String {
    name.trim_matches('/').replace(['/', '\\'], "-")
}

pub fn stdout_log(base: &Path, component: &str) -> PathBuf {
    logs_dir(base).join(format!("{}.stdout", flatten_name(component)))
}

pub fn stderr_log(base: &Path, component: &str) -> PathBuf {
    logs_dir(base).join(format!("{}.stderr", flatten_name(component)))
}

// ---------------------------------------------------------------------------
// HostLayout
// ---------------------------------------------------------------------------

/// Where configuration lives locally and where the engine host sees it.
///
/// With a local engine both views are the base directory. With a remote
/// engine, bind mounts must reference the mirrored tree under
/// [`REMOTE_BASE_DIR`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    pub base_dir: PathBuf,
    pub remote: bool,
}

impl HostLayout {
    pub fn new(base_dir: impl Into<PathBuf>, remote: bool) -> Self {
        Self {
            base_dir: base_dir.into(),
            remote,
        }
    }

    pub fn local_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Path of `name` as seen by the engine host.
    pub fn host_dir(&self, name: &str) -> PathBuf {
        if self.remote {
            Path::new(REMOTE_BASE_DIR).join(name)
        } else {
            self.local_dir(name)
        }
    }

    /// Bind-mount spec `host:container[:opts]` for a config directory.
    pub fn bind(&self, name: &str, container_path: &str, opts: Option<&str>) -> String {
        let host = self.host_dir(name);
        match opts {
            Some(o) => format!("{}:{container_path}:{o}", host.display()),
            None => format!("{}:{container_path}", host.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
