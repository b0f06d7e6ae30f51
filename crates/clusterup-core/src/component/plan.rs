//! Typed install plans.
//!
//! Both manifest strategies compile to an [`InstallPlan`]: an ordered list of
//! steps. Container apply mode renders the plan as a shell script; API apply
//! mode walks it with [`ClusterApi`] calls. Step order is identical in both.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::cluster::{process, ClusterApi, ClusterError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// Add users to the privileged security context constraint.
    GrantPrivileged { users: Vec<String> },
    /// Apply a namespace object.
    ApplyNamespace { manifest: Bytes },
    /// Create the namespace if it does not exist.
    EnsureNamespace { name: String },
    /// Render the RBAC template and merge it additively.
    ReconcileRbac { template: Bytes },
    /// Render the install template and apply it.
    ApplyTemplate { template: Bytes },
    /// Apply a raw manifest verbatim.
    ApplyManifest { manifest: Bytes },
}

impl InstallStep {
    pub fn label(&self) -> &'static str {
        match self {
            InstallStep::GrantPrivileged { .. } => "grant-privileged",
            InstallStep::ApplyNamespace { .. } => "apply-namespace",
            InstallStep::EnsureNamespace { .. } => "ensure-namespace",
            InstallStep::ReconcileRbac { .. } => "reconcile-rbac",
            InstallStep::ApplyTemplate { .. } => "apply-template",
            InstallStep::ApplyManifest { .. } => "apply-manifest",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    /// Target namespace; empty means cluster scope.
    pub namespace: String,
    pub params: BTreeMap<String, String>,
    pub steps: Vec<InstallStep>,
}

impl InstallPlan {
    pub fn namespace(&self) -> Option<&str> {
        (!self.namespace.is_empty()).then_some(self.namespace.as_str())
    }

    /// Resolve the parameters of every template step against `params`.
    /// Container mode renders templates remotely, so this is its only local
    /// check before the client container runs.
    pub fn check_parameters(&self) -> Result<(), ClusterError> {
        for step in &self.steps {
            if let InstallStep::ReconcileRbac { template } | InstallStep::ApplyTemplate { template } = step {
                process::resolve_parameters(template, &self.params)?;
            }
        }
        Ok(())
    }

    /// Render every template step up front so parameter errors surface before
    /// anything touches the cluster.
    pub fn prepare(&self) -> Result<PreparedPlan, ClusterError> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if matches!(step, InstallStep::EnsureNamespace { name } if name.is_empty()) {
                continue;
            }
            steps.push(match step {
                InstallStep::GrantPrivileged { users } => PreparedStep::GrantPrivileged(users.clone()),
                InstallStep::ApplyNamespace { manifest } => {
                    PreparedStep::Apply(process::parse_manifest(manifest)?, None)
                }
                InstallStep::EnsureNamespace { name } => PreparedStep::EnsureNamespace(name.clone()),
                InstallStep::ReconcileRbac { template } => {
                    PreparedStep::Reconcile(
                        process::process_template(template, &self.params)?,
                        self.namespace().map(String::from),
                    )
                }
                InstallStep::ApplyTemplate { template } => PreparedStep::Apply(
                    process::process_template(template, &self.params)?,
                    self.namespace().map(String::from),
                ),
                InstallStep::ApplyManifest { manifest } => PreparedStep::Apply(
                    process::parse_manifest(manifest)?,
                    self.namespace().map(String::from),
                ),
            });
        }
        Ok(PreparedPlan { steps })
    }
}

/// A plan with every template rendered into objects.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    steps: Vec<PreparedStep>,
}

#[derive(Debug, Clone)]
enum PreparedStep {
    GrantPrivileged(Vec<String>),
    EnsureNamespace(String),
    Apply(Vec<kube::api::DynamicObject>, Option<String>),
    Reconcile(Vec<kube::api::DynamicObject>, Option<String>),
}

impl PreparedPlan {
    /// Execute each step in order, stopping at the first error.
    pub async fn execute(&self, api: &dyn ClusterApi) -> Result<(), ClusterError> {
        for step in &self.steps {
            match step {
                PreparedStep::GrantPrivileged(users) => api.grant_privileged(users).await?,
                PreparedStep::EnsureNamespace(name) => api.ensure_namespace(name).await?,
                PreparedStep::Apply(objects, ns) => api.apply_objects(objects, ns.as_deref()).await?,
                PreparedStep::Reconcile(objects, ns) => api.reconcile_rbac(objects, ns.as_deref()).await?,
            }
        }
        Ok(())
    }
}
