//! Installable components.
//!
//! A [`Component`] is a named unit of installation: a raw manifest, a
//! parameterized template, or a composite of other components. Every kind
//! installs through [`Installable::install`]; batches go through
//! [`install_components`].

mod list;
mod orchestrator;
pub mod plan;
pub mod script;
mod template;

pub use list::List;
pub use orchestrator::{install_components, AggregateError};
pub use template::Template;

use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::cluster::{ClusterApi, ClusterError};
use crate::context::{ApplyMode, InstallContext};
use crate::engine::{CapturedOutput, ContainerEngine, EngineError};
use crate::paths;
use crate::task::{ContainerTask, TaskError};
use crate::wait::{self, WaitError};

use plan::InstallPlan;

/// Label naming the component an apply container belongs to.
pub const COMPONENT_LABEL: &str = "io.clusterup.component";

pub const COMPOSITE_NAME: &str = "composite";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("readiness check failed: {0}")]
    Readiness(#[from] WaitError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("install of {0} was cancelled before it finished")]
    Interrupted(String),
}

// ---------------------------------------------------------------------------
// Readiness predicate
// ---------------------------------------------------------------------------

type ReadinessFuture = Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send>>;

/// Async predicate polled after a successful apply.
#[derive(Clone)]
pub struct Readiness(Arc<dyn Fn() -> ReadinessFuture + Send + Sync>);

impl std::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Readiness(..)")
    }
}

impl Readiness {
    pub fn new<F, Fut, E>(check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self(Arc::new(move || -> ReadinessFuture {
            let fut = check();
            Box::pin(async move { fut.await.map_err(Into::into) })
        }))
    }

    /// Ready once the deployment has all replicas available.
    pub fn deployment(api: Arc<dyn ClusterApi>, namespace: &str, name: &str) -> Self {
        let (namespace, name) = (namespace.to_string(), name.to_string());
        Self::new(move || {
            let api = api.clone();
            let (namespace, name) = (namespace.clone(), name.clone());
            async move { api.deployment_ready(&namespace, &name).await }
        })
    }

    pub async fn check(&self) -> Result<bool, BoxError> {
        (self.0)().await
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Installable: Send + Sync {
    fn name(&self) -> &str;

    async fn install(&self, engine: &Arc<dyn ContainerEngine>) -> Result<(), ComponentError>;
}

#[derive(Debug, Clone)]
pub enum ComponentKind {
    Manifest(List),
    ParameterizedTemplate(Template),
    Composite(Vec<Component>),
}

#[derive(Debug, Clone)]
pub struct Component {
    name: String,
    kind: ComponentKind,
}

impl Component {
    pub fn list(name: impl Into<String>, list: List) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Manifest(list),
        }
    }

    pub fn template(name: impl Into<String>, template: Template) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::ParameterizedTemplate(template),
        }
    }

    pub fn composite(members: Vec<Component>) -> Self {
        Self {
            name: COMPOSITE_NAME.to_string(),
            kind: ComponentKind::Composite(members),
        }
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> &ComponentKind {
        &self.kind
    }
}

#[async_trait]
impl Installable for Component {
    fn name(&self) -> &str {
        &self.name
    }

    async fn install(&self, engine: &Arc<dyn ContainerEngine>) -> Result<(), ComponentError> {
        match &self.kind {
            ComponentKind::Manifest(list) => list.install(&self.name, engine).await,
            ComponentKind::ParameterizedTemplate(t) => t.install(&self.name, engine).await,
            ComponentKind::Composite(members) => {
                install_components(members.clone(), engine).await?;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Plan execution shared by both strategies
// ---------------------------------------------------------------------------

/// Apply `plan` with bounded retry, then wait for `readiness` if set.
pub(crate) async fn apply_plan(
    name: &str,
    ctx: &InstallContext,
    plan: &InstallPlan,
    readiness: Option<&Readiness>,
    engine: &Arc<dyn ContainerEngine>,
) -> Result<(), ComponentError> {
    let policy = ctx.timeouts.retry;
    match &ctx.apply_mode {
        ApplyMode::Api(api) => {
            let prepared = plan.prepare()?;
            wait::retry_while(
                name,
                policy,
                |_| prepared.execute(api.as_ref()),
                |e: &ClusterError| !e.is_permanent(),
            )
            .await?;
        }
        ApplyMode::Container => {
            plan.check_parameters()?;
            let bundle = script::render(plan, &ctx.admin_kubeconfig, ctx.log_level);
            let mut task = ContainerTask::new(&ctx.client_image)
                .privileged()
                .host_network()
                .entrypoint(["/bin/sh"])
                .command([script::SCRIPT_PATH])
                .label(COMPONENT_LABEL, name);
            for (path, data) in bundle.files {
                task = task.file(path, data);
            }
            let task = &task;
            wait::retry(name, policy, |attempt| async move {
                engine.ensure_image(&ctx.client_image, ctx.pull_policy).await?;
                let result = task.run(engine).await;
                let output = match &result {
                    Ok(out) => Some(CapturedOutput {
                        stdout: out.stdout.clone(),
                        stderr: out.stderr.clone(),
                    }),
                    Err(e) => e.output().cloned(),
                };
                if let Some(output) = output {
                    write_logs(&ctx.base_dir, name, &output);
                }
                tracing::debug!(component = name, attempt, ok = result.is_ok(), "apply attempt finished");
                result.map(|_| ()).map_err(ComponentError::from)
            })
            .await?;
        }
    }

    if let Some(readiness) = readiness {
        wait::poll_until(
            &format!("{name} to become ready"),
            ctx.timeouts.readiness(),
            || readiness.check(),
        )
        .await?;
    }
    tracing::info!(component = name, "installed");
    Ok(())
}

fn write_logs(base: &Path, name: &str, output: &CapturedOutput) {
    let result = crate::io::ensure_dir(&paths::logs_dir(base))
        .and_then(|()| crate::io::atomic_write(&paths::stdout_log(base, name), output.stdout.as_bytes()))
        .and_then(|()| crate::io::atomic_write(&paths::stderr_log(base, name), output.stderr.as_bytes()));
    if let Err(e) = result {
        tracing::warn!(component = name, error = %e, "failed to write install logs");
    }
}
