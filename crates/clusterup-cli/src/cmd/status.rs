use crate::output::{print_json, render_status};
use anyhow::Context;
use clusterup_core::{config::Config, lifecycle, paths};
use std::path::Path;

pub fn run(base: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(base).context("failed to load clusterup.yaml")?;

    super::block_on(async move {
        let engine = super::connect_engine()?;
        let cluster = if paths::admin_kubeconfig_path(base).exists() {
            match super::connect_cluster(base).await {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::debug!(error = %format!("{e:#}"), "no cluster client");
                    None
                }
            }
        } else {
            None
        };

        let report = lifecycle::status(
            engine.as_ref(),
            base,
            cluster.as_deref(),
            config.network.api_port,
        )
        .await
        .context("failed to read cluster status")?;

        if json {
            return print_json(&report);
        }

        print!("{}", render_status(&report));
        Ok(())
    })
}
