use bytes::Bytes;
use std::sync::Arc;

use super::plan::{InstallPlan, InstallStep};
use super::{apply_plan, ComponentError, Readiness};
use crate::context::InstallContext;
use crate::engine::ContainerEngine;

/// Apply a raw manifest verbatim, optionally into a namespace.
#[derive(Debug, Clone)]
pub struct List {
    pub namespace: String,
    pub manifest: Bytes,
    pub readiness: Option<Readiness>,
    ctx: Arc<InstallContext>,
}

impl List {
    pub fn new(ctx: Arc<InstallContext>, namespace: impl Into<String>, manifest: impl Into<Bytes>) -> Self {
        Self {
            namespace: namespace.into(),
            manifest: manifest.into(),
            readiness: None,
            ctx,
        }
    }

    pub fn ready_when(mut self, readiness: Readiness) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn plan(&self) -> InstallPlan {
        InstallPlan {
            namespace: self.namespace.clone(),
            params: Default::default(),
            steps: vec![InstallStep::ApplyManifest {
                manifest: self.manifest.clone(),
            }],
        }
    }

    pub(crate) async fn install(&self, name: &str, engine: &Arc<dyn ContainerEngine>) -> Result<(), ComponentError> {
        apply_plan(name, &self.ctx, &self.plan(), self.readiness.as_ref(), engine).await
    }
}
