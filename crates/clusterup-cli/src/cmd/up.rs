use anyhow::Context;
use clap::{Args, ValueEnum};
use clusterup_core::{
    catalog::{self, enabled_components},
    config::Config,
    image::{ImageTemplate, PullPolicy, DEFAULT_IMAGE_FORMAT},
    paths,
    pipeline::{
        developer::{DeveloperAccess, INITIAL_USER},
        Pipeline, PipelineSettings,
    },
    preflight::{self, ProxySettings},
    state::ClusterState,
};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApplyModeArg {
    /// Run client commands inside the client image
    Container,
    /// Call the cluster API directly
    Api,
}

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Components to install: `*` for the defaults, `name` to enable, `-name` to disable
    #[arg(long, value_delimiter = ',', default_value = "*")]
    enable: Vec<String>,

    /// Image tag; pins the version and pulls only missing images
    #[arg(long)]
    tag: Option<String>,

    /// Image reference format with `${component}` and `${version}` placeholders
    #[arg(long, default_value = DEFAULT_IMAGE_FORMAT)]
    image: String,

    /// Hostname clients use to reach the server
    #[arg(long)]
    public_hostname: Option<String>,

    /// Wildcard DNS suffix for routes (default: <server-ip>.nip.io)
    #[arg(long)]
    routing_suffix: Option<String>,

    #[arg(long)]
    http_proxy: Option<String>,

    #[arg(long)]
    https_proxy: Option<String>,

    /// Hosts that bypass the proxy
    #[arg(long, value_delimiter = ',')]
    no_proxy: Vec<String>,

    /// Skip the insecure registry check on the engine daemon
    #[arg(long)]
    skip_registry_check: bool,

    /// Generate configuration and stop
    #[arg(long)]
    write_config: bool,

    /// How components are applied to the cluster
    #[arg(long, value_enum, default_value = "container")]
    apply_mode: ApplyModeArg,

    /// Log level of the control plane and node services
    #[arg(long, default_value_t = 0)]
    server_loglevel: u8,
}

/// Names mentioned by `--enable`, without the disable prefix.
fn mentioned(enable: &[String]) -> Vec<String> {
    enable
        .iter()
        .filter(|e| e.as_str() != "*")
        .map(|e| e.trim_start_matches('-').to_string())
        .collect()
}

pub fn run(base: &Path, args: UpArgs, log_level: u8) -> anyhow::Result<()> {
    catalog::validate_names(&mentioned(&args.enable))?;
    catalog::check_enable_allowed(base, &args.enable)?;
    preflight::check_kubeconfig_env(std::env::var("KUBECONFIG").ok().as_deref(), base)?;
    let config = Config::load(base).context("failed to load clusterup.yaml")?;

    super::block_on(up(base, args, log_level, config))
}

async fn up(base: &Path, args: UpArgs, log_level: u8, config: Config) -> anyhow::Result<()> {
    let engine = super::connect_engine()?;
    let info = engine.info().await.context("failed to query the container engine")?;

    preflight::check_not_running(engine.as_ref()).await?;
    if args.skip_registry_check {
        tracing::info!("skipping insecure registry check");
    } else {
        preflight::check_insecure_registry(&info, &config.network.service_cidr)?;
    }

    let template = ImageTemplate::new(args.image).with_version(args.tag.as_deref())?;
    let pull_policy = PullPolicy::for_tag(args.tag.as_deref());
    let port_warnings = preflight::check_available_ports(
        &engine,
        &template.expand("control-plane")?,
        pull_policy,
        &config.network,
    )
    .await?;
    for warning in port_warnings {
        eprintln!("WARNING: {warning}");
    }

    let server_ip = preflight::determine_ip(
        args.public_hostname.as_deref(),
        std::env::var("DOCKER_HOST").ok().as_deref(),
    );

    let mut proxy = ProxySettings {
        http_proxy: args.http_proxy,
        https_proxy: args.https_proxy,
        no_proxy: args.no_proxy,
    };
    if proxy.is_set() {
        proxy.update_no_proxy(&server_ip);
    }
    for warning in proxy.warnings(&info) {
        eprintln!("WARNING: {warning}");
    }

    let mut settings = PipelineSettings::new(server_ip.clone(), template.clone());
    settings.public_hostname = args.public_hostname.clone();
    settings.pull_policy = pull_policy;
    settings.log_level = log_level;
    settings.server_log_level = args.server_loglevel;
    settings.proxy = proxy;
    settings.api_apply = args.apply_mode == ApplyModeArg::Api;
    settings.config = config;
    let api_port = settings.config.network.api_port;

    let pipeline = Pipeline::new(engine.clone(), base, settings);
    pipeline.build_config().await.context("failed to generate configuration")?;

    let mut state = match ClusterState::load_optional(base)? {
        Some(existing) => existing,
        None => ClusterState::new(server_ip, template, pull_policy),
    };
    state.public_hostname = args.public_hostname;
    if let Some(suffix) = args.routing_suffix {
        state.routing_suffix = suffix;
    }
    state.remote = pipeline.layout().remote;
    state.server_log_level = args.server_loglevel;
    state.save(base).context("failed to save cluster state")?;

    if args.write_config {
        println!("Wrote configuration to {}", base.display());
        return Ok(());
    }

    pipeline
        .start_control_plane()
        .await
        .context("failed to start the control plane")?;

    let cluster = super::connect_cluster(base).await?;
    let catalog = pipeline.catalog(&cluster, &state)?;
    let components = enabled_components(&args.enable);
    pipeline
        .wait_and_install(&cluster, &catalog, &components)
        .await
        .context("failed to install components")?;

    state.add_components(&components);
    state.save(base).context("failed to save cluster state")?;

    let access = pipeline
        .set_up_developer(cluster.as_ref())
        .await
        .context("failed to set up the developer account")?;
    for notice in &access.notices {
        eprintln!("WARNING: {notice}");
    }

    print_server_info(base, &state, &components, api_port, &access);
    Ok(())
}

fn print_server_info(
    base: &Path,
    state: &ClusterState,
    components: &[String],
    api_port: u16,
    access: &DeveloperAccess,
) {
    let url = state.server_url(api_port);
    println!("Server started.\n");
    println!("The server is accessible at:\n    {url}\n");
    if components.iter().any(|c| c == "web-console") {
        println!("The web console is accessible at:\n    {url}/console\n");
    }
    println!("You are logged in as:\n    User:     {INITIAL_USER}\n    Password: <any value>\n");
    if let Some(kubeconfig) = &access.kubeconfig {
        println!("The developer kubeconfig is at:\n    {}\n", kubeconfig.display());
    }
    if let Some(project) = &access.project {
        println!("Using project \"{project}\".\n");
    }
    println!(
        "The admin kubeconfig is at:\n    {}\n",
        paths::admin_kubeconfig_path(base).display()
    );
    println!("To stop the cluster:\n    $ clusterup down");
}
