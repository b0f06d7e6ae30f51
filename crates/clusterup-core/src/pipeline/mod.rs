//! The ordered steps that take an empty base directory to a running cluster.
//!
//! [`Pipeline::build_config`] generates configuration, one directory per
//! step; a step whose directory already exists is skipped.
//! [`Pipeline::start_control_plane`] starts the kubelet and the key-value
//! store and renders the bootstrap policy. [`Pipeline::wait_and_install`]
//! waits for health and installs components run level by run level.
//! [`Pipeline::set_up_developer`] then prepares the initial user.

pub mod developer;
pub mod dns;
pub mod remote;
pub mod static_pods;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::{Catalog, RunLevel};
use crate::cluster::ClusterApi;
use crate::component::install_components;
use crate::config::Config;
use crate::context::{ApplyMode, InstallContext};
use crate::engine::{archive, ContainerEngine, DaemonInfo, EngineError};
use crate::error::Result;
use crate::image::{ImageTemplate, PullPolicy};
use crate::io;
use crate::paths::{self, HostLayout};
use crate::preflight::ProxySettings;
use crate::readiness::{self, CORE_APIS};
use crate::state::ClusterState;
use crate::task::ContainerTask;

pub const KUBELET_CONTAINER: &str = "clusterup-kubelet";
pub const ETCD_CONTAINER: &str = "clusterup-etcd";
/// Client port the key-value store listens on.
pub const ETCD_PORT: u16 = 4001;
const CONFIG_CONTAINER: &str = "clusterup-config";

/// Control-plane config directory inside generator containers.
const MASTER_MOUNT: &str = "/var/lib/origin/openshift.local.config/master";
/// Generator containers write their result under `/output/<dir>`.
const OUTPUT_ROOT: &str = "/output";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub server_ip: String,
    pub public_hostname: Option<String>,
    pub image_template: ImageTemplate,
    pub pull_policy: PullPolicy,
    /// Verbosity of client commands run in containers.
    pub log_level: u8,
    /// Verbosity of the control plane and the services it runs.
    pub server_log_level: u8,
    pub proxy: ProxySettings,
    pub config: Config,
    /// Resolver file whose nameservers the cluster DNS forwards to.
    pub resolv_conf: PathBuf,
    /// Apply components through the API instead of client containers.
    pub api_apply: bool,
}

impl PipelineSettings {
    pub fn new(server_ip: impl Into<String>, image_template: ImageTemplate) -> Self {
        Self {
            server_ip: server_ip.into(),
            public_hostname: None,
            image_template,
            pull_policy: PullPolicy::default(),
            log_level: 0,
            server_log_level: 0,
            proxy: ProxySettings::default(),
            config: Config::default(),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            api_apply: false,
        }
    }

    /// Settings recorded by an earlier `up`.
    pub fn from_state(state: &ClusterState, config: Config) -> Self {
        let mut settings = Self::new(state.server_ip.clone(), state.image_template.clone());
        settings.public_hostname = state.public_hostname.clone();
        settings.pull_policy = state.pull_policy;
        settings.server_log_level = state.server_log_level;
        settings.config = config;
        settings
    }

    fn public_host(&self) -> &str {
        self.public_hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.server_ip)
    }

    pub fn master_url(&self) -> String {
        format!("https://{}:{}", self.server_ip, self.config.network.api_port)
    }

    pub fn public_url(&self) -> String {
        format!("https://{}:{}", self.public_host(), self.config.network.api_port)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    engine: Arc<dyn ContainerEngine>,
    layout: HostLayout,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn ContainerEngine>, base_dir: impl Into<PathBuf>, settings: PipelineSettings) -> Self {
        let layout = HostLayout::new(base_dir, engine.is_remote());
        Self {
            engine,
            layout,
            settings,
        }
    }

    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn image(&self, component: &str) -> Result<String> {
        self.settings.image_template.expand(component)
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.engine.ensure_image(image, self.settings.pull_policy).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Steps 1-4: configuration
    // -----------------------------------------------------------------------

    pub async fn build_config(&self) -> Result<()> {
        io::ensure_dir(&self.layout.base_dir)?;
        self.step(paths::KUBE_APISERVER_DIR, "control-plane config", || self.write_master_config())
            .await?;
        self.step(paths::NODE_DIR, "node config", || self.write_node_config())
            .await?;
        self.step(paths::KUBE_DNS_DIR, "DNS config", || async { self.write_dns_config() })
            .await?;
        self.step(paths::STATIC_POD_DIR, "static pod manifests", || async { self.write_static_pods() })
            .await?;
        Ok(())
    }

    /// Run `produce` unless `dir` exists, then mirror `dir` to a remote
    /// engine host. A failed step leaves no directory behind.
    async fn step<F, Fut>(&self, dir: &str, what: &str, produce: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let local = self.layout.local_dir(dir);
        if local.exists() {
            tracing::info!(dir, "{what} already exists, skipping");
            return Ok(());
        }
        tracing::info!(dir, "creating {what}");
        if let Err(e) = produce().await {
            if local.exists() {
                if let Err(rm) = std::fs::remove_dir_all(&local) {
                    tracing::warn!(dir, error = %rm, "failed to clean up partial output");
                }
            }
            return Err(e);
        }
        if self.layout.remote {
            let image = self.image("cli")?;
            self.pull(&image).await?;
            remote::mirror(&self.engine, &self.layout, dir, &image).await?;
        }
        Ok(())
    }

    /// Run a generator task and extract `/output/<dir>` into the local `dir`.
    async fn generate(&self, task: ContainerTask, dir: &str) -> Result<()> {
        remove_existing(self.engine.as_ref(), CONFIG_CONTAINER).await?;
        self.pull(&task.spec().image).await?;

        let out = match task.name(CONFIG_CONTAINER).keep_container().run(&self.engine).await {
            Ok(out) => out,
            Err(e) => {
                if let Err(rm) = remove_existing(self.engine.as_ref(), CONFIG_CONTAINER).await {
                    tracing::warn!(error = %rm, "failed to remove config container");
                }
                return Err(e.into());
            }
        };
        let id = out.container_id.unwrap_or_else(|| CONFIG_CONTAINER.to_string());
        let downloaded = self.engine.download(&id, &format!("{OUTPUT_ROOT}/{dir}")).await;
        if let Err(e) = self.engine.remove(&id).await {
            tracing::warn!(container = %id, error = %e, "failed to remove config container");
        }
        archive::unpack_stripped(&downloaded?, &self.layout.local_dir(dir))?;
        Ok(())
    }

    async fn write_master_config(&self) -> Result<()> {
        let s = &self.settings;
        let net = &s.config.network;
        let task = ContainerTask::new(self.image("control-plane")?)
            .privileged()
            .host_network()
            .entrypoint(["openshift"])
            .command([
                "start".to_string(),
                "master".to_string(),
                format!("--write-config={OUTPUT_ROOT}/{}", paths::KUBE_APISERVER_DIR),
                format!("--master={}", s.master_url()),
                format!("--public-master={}", s.public_url()),
                format!("--images={}", s.image_template),
                format!("--dns=0.0.0.0:{}", net.dns_port),
                format!("--portal-net={}", net.service_cidr),
                "--etcd-dir=/var/lib/etcd".to_string(),
                format!("--loglevel={}", s.server_log_level),
            ]);
        self.generate(task, paths::KUBE_APISERVER_DIR).await
    }

    async fn write_node_config(&self) -> Result<()> {
        let s = &self.settings;
        let ca = format!("{MASTER_MOUNT}/ca.crt");
        let task = ContainerTask::new(self.image("control-plane")?)
            .privileged()
            .host_network()
            .bind(self.layout.bind(paths::KUBE_APISERVER_DIR, MASTER_MOUNT, Some("z")))
            .entrypoint(["openshift"])
            .command([
                "adm".to_string(),
                "create-node-config".to_string(),
                format!("--node-dir={OUTPUT_ROOT}/{}", paths::NODE_DIR),
                "--node=localhost".to_string(),
                format!("--hostnames=localhost,127.0.0.1,{}", s.server_ip),
                format!("--dns-bind-address=0.0.0.0:{}", s.config.network.dns_port),
                format!("--dns-ip={}", s.server_ip),
                format!("--master={}", s.master_url()),
                format!("--certificate-authority={ca}"),
                format!("--node-client-certificate-authority={ca}"),
                format!("--signer-cert={ca}"),
                format!("--signer-key={MASTER_MOUNT}/ca.key"),
                format!("--signer-serial={MASTER_MOUNT}/ca.serial.txt"),
            ]);
        self.generate(task, paths::NODE_DIR).await
    }

    fn write_dns_config(&self) -> Result<()> {
        dns::write_dns_config(
            &self.layout.local_dir(paths::NODE_DIR),
            &self.layout.local_dir(paths::KUBE_DNS_DIR),
            &self.settings.resolv_conf,
            &self.settings.server_ip,
            &self.settings.master_url(),
        )
    }

    fn write_static_pods(&self) -> Result<()> {
        let values = static_pods::StaticPodValues {
            images: BTreeMap::from([
                ("kube-apiserver".to_string(), self.image("hypershift")?),
                ("kube-controller-manager".to_string(), self.image("hyperkube")?),
                ("kube-scheduler".to_string(), self.image("hyperkube")?),
            ]),
            pull_policy: self.settings.pull_policy,
            log_level: self.settings.server_log_level,
            api_port: self.settings.config.network.api_port,
            master_config_dir: self.host_dir(paths::KUBE_APISERVER_DIR),
        };
        let dir = self.layout.local_dir(paths::STATIC_POD_DIR);
        for (file, manifest) in static_pods::render(&values)? {
            io::atomic_write(&dir.join(file), manifest.as_bytes())?;
        }
        Ok(())
    }

    fn host_dir(&self, name: &str) -> String {
        self.layout.host_dir(name).display().to_string()
    }

    // -----------------------------------------------------------------------
    // Steps 5-7: control plane
    // -----------------------------------------------------------------------

    pub async fn start_control_plane(&self) -> Result<()> {
        let info = self.engine.info().await?;
        self.start_kubelet(&info).await?;
        self.start_etcd().await?;
        self.render_bootstrap().await
    }

    async fn start_kubelet(&self, info: &DaemonInfo) -> Result<()> {
        let s = &self.settings;
        let image = self.image("node")?;
        self.pull(&image).await?;
        remove_existing(self.engine.as_ref(), KUBELET_CONTAINER).await?;

        let mut binds = vec![
            self.layout.bind(paths::KUBE_APISERVER_DIR, MASTER_MOUNT, Some("z")),
            self.layout.bind(paths::NODE_DIR, "/var/lib/origin/openshift.local.config/node", Some("z")),
            self.layout.bind(paths::KUBE_DNS_DIR, "/var/lib/origin/openshift.local.config/kube-dns", Some("z")),
            self.layout.bind(paths::STATIC_POD_DIR, "/var/lib/origin/pod-manifests", Some("z")),
            self.layout.bind(paths::PV_DIR, "/var/lib/origin/openshift.local.pv", Some("rslave")),
            "/:/rootfs:ro".to_string(),
            "/var/run:/var/run:rw".to_string(),
            "/sys:/sys:rw".to_string(),
            "/sys/fs/cgroup:/sys/fs/cgroup:rw".to_string(),
            "/dev:/dev".to_string(),
            "/var/lib/kubelet:/var/lib/kubelet:rslave".to_string(),
        ];
        if !info.root_dir.is_empty() {
            binds.push(format!("{0}:{0}", info.root_dir));
        }

        let mut task = ContainerTask::new(image)
            .name(KUBELET_CONTAINER)
            .privileged()
            .host_network()
            .host_pid()
            .binds(binds)
            .command([
                "kubelet".to_string(),
                "--pod-manifest-path=/var/lib/origin/pod-manifests".to_string(),
                "--kubeconfig=/var/lib/origin/openshift.local.config/node/node.kubeconfig".to_string(),
                format!("--cluster-dns={}", s.server_ip),
                "--cluster-domain=cluster.local".to_string(),
                format!("--v={}", s.server_log_level),
            ]);
        for (k, v) in s.proxy.env() {
            task = task.env(k, &v);
        }
        let id = task.start(&self.engine).await?;
        tracing::info!(container = %id, "kubelet started");
        Ok(())
    }

    async fn start_etcd(&self) -> Result<()> {
        io::ensure_dir(&self.layout.local_dir(paths::ETCD_DIR))?;
        let image = self.settings.config.etcd_image.clone();
        self.pull(&image).await?;
        remove_existing(self.engine.as_ref(), ETCD_CONTAINER).await?;

        let tls = "/etc/etcd/tls";
        let id = ContainerTask::new(image)
            .name(ETCD_CONTAINER)
            .privileged()
            .host_network()
            .bind(self.layout.bind(paths::ETCD_DIR, "/var/lib/etcd", Some("z")))
            .bind(self.layout.bind(paths::KUBE_APISERVER_DIR, tls, Some("ro")))
            .command([
                "etcd".to_string(),
                "--data-dir=/var/lib/etcd".to_string(),
                format!("--listen-client-urls=https://0.0.0.0:{ETCD_PORT}"),
                format!("--advertise-client-urls=https://127.0.0.1:{ETCD_PORT}"),
                format!("--cert-file={tls}/etcd.server.crt"),
                format!("--key-file={tls}/etcd.server.key"),
                format!("--trusted-ca-file={tls}/ca.crt"),
                "--client-cert-auth".to_string(),
            ])
            .start(&self.engine)
            .await?;
        tracing::info!(container = %id, "key-value store started");
        Ok(())
    }

    async fn render_bootstrap(&self) -> Result<()> {
        let image = self.image("control-plane")?;
        self.pull(&image).await?;
        ContainerTask::new(image)
            .privileged()
            .host_network()
            .bind(self.layout.bind(paths::KUBE_APISERVER_DIR, MASTER_MOUNT, Some("z")))
            .entrypoint(["openshift"])
            .command([
                "adm".to_string(),
                "create-bootstrap-policy-file".to_string(),
                format!("--filename={MASTER_MOUNT}/policy.json"),
            ])
            .run(&self.engine)
            .await?;
        tracing::info!("bootstrap policy rendered");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Steps 8-9: health and components
    // -----------------------------------------------------------------------

    /// Install context for components applied against this cluster.
    pub fn install_context(&self, cluster: &Arc<dyn ClusterApi>) -> Result<InstallContext> {
        let kubeconfig = std::fs::read(paths::admin_kubeconfig_path(&self.layout.base_dir))?;
        let s = &self.settings;
        let mut ctx = InstallContext::new(kubeconfig, self.layout.base_dir.clone(), s.image_template.clone())?
            .with_log_level(s.log_level)
            .with_server_log_level(s.server_log_level)
            .with_pull_policy(s.pull_policy)
            .with_timeouts(s.config.timeouts);
        if s.api_apply {
            ctx = ctx.with_apply_mode(ApplyMode::Api(cluster.clone()));
        }
        Ok(ctx)
    }

    pub fn catalog(&self, cluster: &Arc<dyn ClusterApi>, state: &ClusterState) -> Result<Catalog> {
        let ctx = self.install_context(cluster)?.into_shared();
        Ok(
            Catalog::new(ctx, self.layout.clone(), state, self.settings.config.network.api_port)
                .with_readiness(cluster.clone()),
        )
    }

    /// Wait for health, install run levels 0 and 1, wait for the core APIs,
    /// then install `components`.
    pub async fn wait_and_install(
        &self,
        cluster: &Arc<dyn ClusterApi>,
        catalog: &Catalog,
        components: &[String],
    ) -> Result<()> {
        let timeouts = &self.settings.config.timeouts;
        readiness::wait_for_healthy(cluster.as_ref(), timeouts.health()).await?;

        for level in [RunLevel::Zero, RunLevel::One] {
            tracing::info!(?level, "installing run level");
            install_components(catalog.run_level(level)?, &self.engine).await?;
        }
        readiness::wait_for_apis(cluster.as_ref(), CORE_APIS, timeouts.readiness()).await?;

        if !components.is_empty() {
            install_components(catalog.components(components)?, &self.engine).await?;
        }
        Ok(())
    }
}

/// Stop and remove the container called `name`, if there is one.
pub(crate) async fn remove_existing(engine: &dyn ContainerEngine, name: &str) -> std::result::Result<(), EngineError> {
    if let Some(state) = engine.inspect(name).await? {
        if state.running {
            engine.stop(&state.id).await?;
        }
        engine.remove(&state.id).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
