//! First-use setup once components are installed: the local web console
//! redirect, the initial developer login, and its project.

use kube::api::DynamicObject;
use serde_json::json;
use std::path::PathBuf;

use super::{Pipeline, OUTPUT_ROOT};
use crate::cluster::{ClusterApi, ClusterError};
use crate::error::Result;
use crate::paths;
use crate::task::ContainerTask;

pub const WEB_CONSOLE_CLIENT: &str = "openshift-web-console";
/// Where a locally served web console development build listens.
pub const LOCAL_CONSOLE_REDIRECT_URI: &str = "https://localhost:9000";

pub const INITIAL_USER: &str = "developer";
pub const INITIAL_PASSWORD: &str = "developer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectRequest {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

pub const INITIAL_PROJECT: ProjectRequest = ProjectRequest {
    name: "myproject",
    display_name: "My Project",
    description: "Initial developer project",
};

/// What the setup did, for the server summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeveloperAccess {
    /// Set when the initial user was logged in on this run.
    pub kubeconfig: Option<PathBuf>,
    pub project: Option<String>,
    /// Steps that failed without failing `up`, with manual instructions.
    pub notices: Vec<String>,
}

/// Add the local console redirect to the web console's OAuth client.
/// Failure is not fatal; the returned notice tells the user how to do it.
pub async fn ensure_redirect_uri(cluster: &dyn ClusterApi) -> Option<String> {
    match cluster
        .add_redirect_uri(WEB_CONSOLE_CLIENT, LOCAL_CONSOLE_REDIRECT_URI)
        .await
    {
        Ok(true) => {
            tracing::info!(client = WEB_CONSOLE_CLIENT, uri = LOCAL_CONSOLE_REDIRECT_URI, "added OAuth redirect URI");
            None
        }
        Ok(false) => None,
        Err(e) => {
            tracing::warn!(error = %e, "cannot update the web console OAuth client");
            Some(format!(
                "Could not add {LOCAL_CONSOLE_REDIRECT_URI} to the redirect URIs of OAuth client {WEB_CONSOLE_CLIENT}: {e}\n   \
                 To add it yourself:\n   \
                 $ oc patch oauthclient/{WEB_CONSOLE_CLIENT} --type=json -p '[{{\"op\":\"add\",\"path\":\"/redirectURIs/-\",\"value\":\"{LOCAL_CONSOLE_REDIRECT_URI}\"}}]'"
            ))
        }
    }
}

/// Whether the initial user still has to be created. A failed lookup
/// assumes it does.
pub async fn needs_initial_user(cluster: &dyn ClusterApi) -> bool {
    match cluster.user_exists(INITIAL_USER).await {
        Ok(exists) => !exists,
        Err(e) => {
            tracing::warn!(user = INITIAL_USER, error = %e, "cannot look up the initial user, creating it");
            true
        }
    }
}

/// The namespace for `project`, annotated as a project, and an admin
/// binding for `user` inside it.
pub fn project_objects(project: &ProjectRequest, user: &str) -> std::result::Result<Vec<DynamicObject>, ClusterError> {
    let namespace = json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": project.name,
            "annotations": {
                "openshift.io/display-name": project.display_name,
                "openshift.io/description": project.description,
                "openshift.io/requester": user,
            },
        },
    });
    let binding = json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": { "name": "admin", "namespace": project.name },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": "admin",
        },
        "subjects": [{
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "User",
            "name": user,
        }],
    });
    Ok(vec![serde_json::from_value(namespace)?, serde_json::from_value(binding)?])
}

impl Pipeline {
    /// Log `user` in with the client image and keep the resulting
    /// kubeconfig under the base directory.
    pub async fn login(&self, user: &str, password: &str) -> Result<PathBuf> {
        let out_dir = format!("{OUTPUT_ROOT}/{}", paths::DEVELOPER_DIR);
        let script = format!(
            "mkdir -p {out_dir} && oc login {} --username={user} --password={password} \
             --insecure-skip-tls-verify=true --config={out_dir}/{}",
            self.settings.master_url(),
            paths::DEVELOPER_KUBECONFIG,
        );
        let mut task = ContainerTask::new(self.image("cli")?)
            .host_network()
            .entrypoint(["/bin/sh"])
            .command(["-c".to_string(), script]);
        for (k, v) in self.settings.proxy.env() {
            task = task.env(k, &v);
        }
        self.generate(task, paths::DEVELOPER_DIR).await?;
        tracing::info!(user, "logged in");
        Ok(paths::developer_kubeconfig_path(&self.layout.base_dir))
    }

    /// Redirect URI, then the initial user and project when the user does
    /// not exist yet.
    pub async fn set_up_developer(&self, cluster: &dyn ClusterApi) -> Result<DeveloperAccess> {
        let mut access = DeveloperAccess::default();
        access.notices.extend(ensure_redirect_uri(cluster).await);

        if !needs_initial_user(cluster).await {
            tracing::debug!(user = INITIAL_USER, "initial user exists, skipping login");
            return Ok(access);
        }
        access.kubeconfig = Some(self.login(INITIAL_USER, INITIAL_PASSWORD).await?);

        let objects = project_objects(&INITIAL_PROJECT, INITIAL_USER)?;
        cluster.apply_objects(&objects, Some(INITIAL_PROJECT.name)).await?;
        tracing::info!(project = INITIAL_PROJECT.name, "created initial project");
        access.project = Some(INITIAL_PROJECT.name.to_string());
        Ok(access)
    }
}
