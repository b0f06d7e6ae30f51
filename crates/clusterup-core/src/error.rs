use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::component::ComponentError;
use crate::engine::EngineError;
use crate::task::TaskError;
use crate::wait::WaitError;

#[derive(Debug, Error)]
pub enum ClusterUpError {
    #[error("not initialized: {} does not exist, run 'clusterup up' first", .0.display())]
    NotInitialized(PathBuf),

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("template '{template}' references unknown key(s): {}", .keys.join(", "))]
    UnresolvedKeys { template: String, keys: Vec<String> },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Install(#[from] crate::component::AggregateError),

    #[error(transparent)]
    Fatal(#[from] Fatal),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClusterUpError {
    /// Remediation text, when the error carries one.
    pub fn solution(&self) -> Option<&str> {
        match self {
            ClusterUpError::Fatal(f) => f.solution(),
            ClusterUpError::NotInitialized(_) => Some("run 'clusterup up' to create the cluster"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterUpError>;

/// A user-facing failure: a message, an optional underlying cause, and an
/// optional remediation hint printed after the cause chain.
#[derive(Debug)]
pub struct Fatal {
    message: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    solution: Option<String>,
}

impl Fatal {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            solution: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = Some(solution.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn solution(&self) -> Option<&str> {
        self.solution.as_deref()
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Fatal {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
