use anyhow::Context;
use clap::Args;
use clusterup_core::{
    catalog,
    component::install_components,
    config::Config,
    pipeline::{Pipeline, PipelineSettings},
    state::ClusterState,
};
use std::path::Path;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Component names
    #[arg(required = true)]
    names: Vec<String>,

    /// Image reference format with `${component}` and `${version}` placeholders
    /// (default: the format recorded by `up`)
    #[arg(long)]
    image: Option<String>,

    /// Image tag; pins the version and pulls only missing images
    #[arg(long)]
    tag: Option<String>,
}

pub fn run(base: &Path, args: AddArgs, log_level: u8) -> anyhow::Result<()> {
    catalog::validate_names(&args.names)?;
    let state = ClusterState::load(base)?;
    let config = Config::load(base).context("failed to load clusterup.yaml")?;

    super::block_on(add(base, args, log_level, state, config))
}

async fn add(
    base: &Path,
    args: AddArgs,
    log_level: u8,
    mut state: ClusterState,
    config: Config,
) -> anyhow::Result<()> {
    let (image_template, pull_policy) = state
        .images(args.image.as_deref(), args.tag.as_deref())
        .context("invalid --image")?;

    let engine = super::connect_engine()?;
    let mut settings = PipelineSettings::from_state(&state, config);
    settings.image_template = image_template;
    settings.pull_policy = pull_policy;
    settings.log_level = log_level;
    let pipeline = Pipeline::new(engine.clone(), base, settings);

    let cluster = super::connect_cluster(base).await?;
    let catalog = pipeline.catalog(&cluster, &state)?;
    install_components(catalog.components(&args.names)?, &engine)
        .await
        .context("failed to install components")?;

    state.add_components(&args.names);
    state.save(base).context("failed to save cluster state")?;
    for name in &args.names {
        println!("added {name}");
    }
    Ok(())
}
