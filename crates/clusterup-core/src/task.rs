//! Ephemeral and long-running container tasks.
//!
//! A [`ContainerTask`] describes one container: image, privilege and
//! namespace flags, bind mounts, environment, and files to inject before
//! start. [`ContainerTask::run`] blocks until exit and captures output;
//! [`ContainerTask::start`] returns as soon as the container is running.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::engine::{archive, CapturedOutput, ContainerEngine, ContainerSpec, EngineError, MANAGED_LABEL};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to run {image} {}: {source}", describe(.entrypoint, .command))]
    Run {
        image: String,
        entrypoint: Vec<String>,
        command: Vec<String>,
        output: Option<CapturedOutput>,
        #[source]
        source: EngineError,
    },

    #[error("{image} {} exited with code {exit_code}", describe(.entrypoint, .command))]
    NonZeroExit {
        image: String,
        entrypoint: Vec<String>,
        command: Vec<String>,
        exit_code: i64,
        output: CapturedOutput,
    },
}

impl TaskError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            TaskError::Run { output, .. } => output.as_ref(),
            TaskError::NonZeroExit { output, .. } => Some(output),
        }
    }
}

fn describe(entrypoint: &[String], command: &[String]) -> String {
    entrypoint
        .iter()
        .chain(command.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Set only when the container was kept after exit.
    pub container_id: Option<String>,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ContainerTask {
    spec: ContainerSpec,
    files: BTreeMap<String, Bytes>,
    keep_container: bool,
}

impl fmt::Debug for ContainerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerTask")
            .field("spec", &self.spec)
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .field("keep_container", &self.keep_container)
            .finish()
    }
}

impl ContainerTask {
    pub fn new(image: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        Self {
            spec: ContainerSpec {
                image: image.into(),
                labels,
                ..Default::default()
            },
            files: BTreeMap::new(),
            keep_container: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = Some(name.into());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.spec.privileged = true;
        self
    }

    pub fn host_network(mut self) -> Self {
        self.spec.host_network = true;
        self
    }

    pub fn host_pid(mut self) -> Self {
        self.spec.host_pid = true;
        self
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.spec.binds.push(bind.into());
        self
    }

    pub fn binds<I, S>(mut self, binds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.binds.extend(binds.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.spec.env.push(format!("{key}={value}"));
        self
    }

    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.entrypoint = entrypoint.into_iter().map(Into::into).collect();
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Inject `data` at absolute path `path` before the container starts.
    pub fn file(mut self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.files.insert(path.into(), data.into());
        self
    }

    /// Leave the container in place after [`run`](Self::run) returns.
    pub fn keep_container(mut self) -> Self {
        self.keep_container = true;
        self
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn files(&self) -> &BTreeMap<String, Bytes> {
        &self.files
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    fn run_error(&self, source: EngineError, output: Option<CapturedOutput>) -> TaskError {
        TaskError::Run {
            image: self.spec.image.clone(),
            entrypoint: self.spec.entrypoint.clone(),
            command: self.spec.command.clone(),
            output,
            source,
        }
    }

    /// Create, inject files, and start. Returns the container id.
    async fn launch(&self, engine: &dyn ContainerEngine) -> Result<String, TaskError> {
        let id = engine
            .create(&self.spec)
            .await
            .map_err(|e| self.run_error(e, None))?;

        if !self.files.is_empty() {
            let tar = archive::pack(&self.files).map_err(|e| self.run_error(e.into(), None))?;
            if let Err(e) = engine.upload(&id, tar).await {
                remove_quietly(engine, &id).await;
                return Err(self.run_error(e, None));
            }
        }

        if let Err(e) = engine.start(&id).await {
            remove_quietly(engine, &id).await;
            return Err(self.run_error(e, None));
        }
        Ok(id)
    }

    /// Remove `id` unless the task asked to keep it.
    async fn finish(&self, engine: &dyn ContainerEngine, id: &str) {
        if !self.keep_container {
            remove_quietly(engine, id).await;
        }
    }

    /// Run to completion and capture output. A non-zero exit is an error.
    pub async fn run(&self, engine: &Arc<dyn ContainerEngine>) -> Result<RunOutput, TaskError> {
        let engine = engine.as_ref();
        tracing::debug!(image = %self.spec.image, cmd = %describe(&self.spec.entrypoint, &self.spec.command), "running task");
        let id = self.launch(engine).await?;

        let exit_code = match engine.wait(&id).await {
            Ok(code) => code,
            Err(e) => {
                let output = engine.logs(&id).await.ok();
                self.finish(engine, &id).await;
                return Err(self.run_error(e, output));
            }
        };

        let output = match engine.logs(&id).await {
            Ok(o) => o,
            Err(e) => {
                self.finish(engine, &id).await;
                return Err(self.run_error(e, None));
            }
        };
        self.finish(engine, &id).await;

        if exit_code != 0 {
            return Err(TaskError::NonZeroExit {
                image: self.spec.image.clone(),
                entrypoint: self.spec.entrypoint.clone(),
                command: self.spec.command.clone(),
                exit_code,
                output,
            });
        }

        Ok(RunOutput {
            container_id: self.keep_container.then_some(id),
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Start detached and return the container id.
    pub async fn start(&self, engine: &Arc<dyn ContainerEngine>) -> Result<String, TaskError> {
        tracing::debug!(image = %self.spec.image, name = ?self.spec.name, "starting task");
        self.launch(engine.as_ref()).await
    }
}

async fn remove_quietly(engine: &dyn ContainerEngine, id: &str) {
    if let Err(e) = engine.remove(id).await {
        tracing::warn!(container = id, error = %e, "failed to remove container");
    }
}
