//! Cluster API boundary.
//!
//! [`ClusterApi`] covers the calls the installer and the readiness protocol
//! make against the running control plane. [`KubeCluster`] implements it on
//! top of a `kube` client built from the admin kubeconfig.

mod kube_impl;
pub mod process;
pub mod rbac;

pub use kube_impl::KubeCluster;

use async_trait::async_trait;
use kube::api::DynamicObject;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("cannot resolve {api_version}/{kind}: {source}")]
    Discovery {
        api_version: String,
        kind: String,
        #[source]
        source: kube::Error,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("missing value for required template parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClusterError {
    /// Errors caused by the manifest content itself; retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ClusterError::MissingParameter(_)
                | ClusterError::InvalidManifest(_)
                | ClusterError::Yaml(_)
                | ClusterError::Json(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCondition {
    pub type_: String,
    pub status: String,
}

/// An aggregated API registration, e.g. `v1.apps.openshift.io`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiServiceInfo {
    pub name: String,
    pub group: String,
    pub version: String,
    pub conditions: Vec<ApiCondition>,
}

impl ApiServiceInfo {
    pub fn is_available(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == "Available" && c.status == "True")
    }

    /// Discovery path served for this group version.
    pub fn discovery_path(&self) -> String {
        format!("/apis/{}/{}", self.group, self.version)
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Add `users` to the privileged security context constraint.
    async fn grant_privileged(&self, users: &[String]) -> Result<(), ClusterError>;

    /// Create the namespace; an existing one is left alone.
    async fn ensure_namespace(&self, name: &str) -> Result<(), ClusterError>;

    /// Server-side apply each object, defaulting namespaced objects to
    /// `namespace` when given.
    async fn apply_objects(
        &self,
        objects: &[DynamicObject],
        namespace: Option<&str>,
    ) -> Result<(), ClusterError>;

    /// Merge rules and subjects into existing RBAC objects without removing
    /// anything already granted.
    async fn reconcile_rbac(
        &self,
        objects: &[DynamicObject],
        namespace: Option<&str>,
    ) -> Result<(), ClusterError>;

    async fn list_api_services(&self) -> Result<Vec<ApiServiceInfo>, ClusterError>;

    /// GET `path` on the API server and return the HTTP status code.
    async fn probe(&self, path: &str) -> Result<u16, ClusterError>;

    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    async fn user_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Append `uri` to the redirect URIs of OAuth client `client`. Returns
    /// false when it was already listed, `NotFound` when the client is missing.
    async fn add_redirect_uri(&self, client: &str, uri: &str) -> Result<bool, ClusterError>;
}

/// Split `group/version` (or a bare core `version`).
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_split() {
        assert_eq!(parse_api_version("apps.openshift.io/v1"), ("apps.openshift.io", "v1"));
        assert_eq!(parse_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn availability_needs_true_available_condition() {
        let mut svc = ApiServiceInfo {
            name: "v1.route.openshift.io".into(),
            group: "route.openshift.io".into(),
            version: "v1".into(),
            conditions: vec![ApiCondition {
                type_: "Available".into(),
                status: "False".into(),
            }],
        };
        assert!(!svc.is_available());
        svc.conditions[0].status = "True".into();
        assert!(svc.is_available());
        assert_eq!(svc.discovery_path(), "/apis/route.openshift.io/v1");
    }
}
