use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::{ComponentError, Installable};
use crate::engine::ContainerEngine;

/// Every failure from one install batch.
#[derive(Debug)]
pub struct AggregateError {
    failures: Vec<(String, ComponentError)>,
}

impl AggregateError {
    pub fn failures(&self) -> &[(String, ComponentError)] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.failures.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [(name, err)] => write!(f, "{name}: {err}"),
            failures => {
                write!(f, "{} components failed to install:", failures.len())?;
                for (name, err) in failures {
                    write!(f, "\n  {name}: {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AggregateError {}

/// Install every component concurrently, wait for all of them, and report
/// every failure. Siblings are never cancelled.
pub async fn install_components<C>(
    components: Vec<C>,
    engine: &Arc<dyn ContainerEngine>,
) -> Result<(), AggregateError>
where
    C: Installable + 'static,
{
    let names: Vec<String> = components.iter().map(|c| c.name().to_string()).collect();
    tracing::info!(components = ?names, "installing");

    let mut set = JoinSet::new();
    for component in components {
        let engine = engine.clone();
        set.spawn(async move {
            let name = component.name().to_string();
            let result = component.install(&engine).await;
            (name, result)
        });
    }

    let mut failures = Vec::new();
    let mut finished = Vec::with_capacity(names.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(()))) => finished.push(name),
            Ok((name, Err(e))) => {
                tracing::error!(component = %name, error = %e, "install failed");
                finished.push(name.clone());
                failures.push((name, e));
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => tracing::error!(error = %e, "install task cancelled"),
        }
    }
    for name in unfinished(&names, finished) {
        failures.push((name.clone(), ComponentError::Interrupted(name)));
    }

    if failures.is_empty() {
        Ok(())
    } else {
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        Err(AggregateError { failures })
    }
}

/// Names in `attempted` with no matching entry in `finished`, counting
/// duplicates.
fn unfinished(attempted: &[String], mut finished: Vec<String>) -> Vec<String> {
    let mut missing = Vec::new();
    for name in attempted {
        match finished.iter().position(|f| f == name) {
            Some(i) => {
                finished.swap_remove(i);
            }
            None => missing.push(name.clone()),
        }
    }
    missing
}
