use anyhow::Context;
use clusterup_core::lifecycle;

pub fn run() -> anyhow::Result<()> {
    super::block_on(async {
        let engine = super::connect_engine()?;
        let removed = lifecycle::down(engine.as_ref())
            .await
            .context("failed to stop the cluster")?;
        if removed.is_empty() {
            println!("No cluster containers found.");
        } else {
            println!("Stopped and removed {} container(s).", removed.len());
        }
        Ok(())
    })
}
