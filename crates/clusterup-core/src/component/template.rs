use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::plan::{InstallPlan, InstallStep};
use super::{apply_plan, ComponentError, Readiness};
use crate::context::InstallContext;
use crate::engine::ContainerEngine;

/// Render a parameterized template and apply it, after granting privileges,
/// creating the namespace, and reconciling RBAC.
#[derive(Debug, Clone)]
pub struct Template {
    pub namespace: String,
    pub privileged_service_accounts: Vec<String>,
    pub namespace_object: Option<Bytes>,
    pub rbac_template: Option<Bytes>,
    pub install_template: Bytes,
    pub params: BTreeMap<String, String>,
    pub readiness: Option<Readiness>,
    ctx: Arc<InstallContext>,
}

impl Template {
    pub fn new(
        ctx: Arc<InstallContext>,
        namespace: impl Into<String>,
        install_template: impl Into<Bytes>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            privileged_service_accounts: Vec::new(),
            namespace_object: None,
            rbac_template: None,
            install_template: install_template.into(),
            params: BTreeMap::new(),
            readiness: None,
            ctx,
        }
    }

    pub fn privileged<I, S>(mut self, service_accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privileged_service_accounts
            .extend(service_accounts.into_iter().map(Into::into));
        self
    }

    pub fn namespace_object(mut self, manifest: impl Into<Bytes>) -> Self {
        self.namespace_object = Some(manifest.into());
        self
    }

    pub fn rbac(mut self, template: impl Into<Bytes>) -> Self {
        self.rbac_template = Some(template.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn ready_when(mut self, readiness: Readiness) -> Self {
        self.readiness = Some(readiness);
        self
    }

    /// Fully qualified user names of the privileged service accounts.
    pub fn privileged_users(&self) -> Vec<String> {
        self.privileged_service_accounts
            .iter()
            .map(|sa| format!("system:serviceaccount:{}:{sa}", self.namespace))
            .collect()
    }

    pub fn plan(&self) -> InstallPlan {
        let mut steps = vec![InstallStep::GrantPrivileged {
            users: self.privileged_users(),
        }];
        match &self.namespace_object {
            Some(manifest) => steps.push(InstallStep::ApplyNamespace {
                manifest: manifest.clone(),
            }),
            None => steps.push(InstallStep::EnsureNamespace {
                name: self.namespace.clone(),
            }),
        }
        if let Some(rbac) = &self.rbac_template {
            steps.push(InstallStep::ReconcileRbac {
                template: rbac.clone(),
            });
        }
        steps.push(InstallStep::ApplyTemplate {
            template: self.install_template.clone(),
        });
        InstallPlan {
            namespace: self.namespace.clone(),
            params: self.params.clone(),
            steps,
        }
    }

    pub(crate) async fn install(&self, name: &str, engine: &Arc<dyn ContainerEngine>) -> Result<(), ComponentError> {
        apply_plan(name, &self.ctx, &self.plan(), self.readiness.as_ref(), engine).await
    }
}
