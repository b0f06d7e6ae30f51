//! The installable components this tool knows about.
//!
//! Catalog components are the optional services `up --enable` and `add`
//! select from. Run-level components bring up the rest of the control plane
//! and are always installed by `up`.

use std::path::Path;
use std::sync::Arc;

use crate::assets::{asset, list};
use crate::cluster::ClusterApi;
use crate::component::{Component, List, Readiness, Template};
use crate::context::InstallContext;
use crate::error::{ClusterUpError, Fatal, Result};
use crate::paths::{self, HostLayout};
use crate::state::ClusterState;

pub const KNOWN_COMPONENTS: &[&str] = &[
    "centos-imagestreams",
    "registry",
    "rhel-imagestreams",
    "router",
    "sample-templates",
    "persistent-volumes",
    "service-catalog",
    "template-service-broker",
    "web-console",
];

pub const DISABLED_BY_DEFAULT: &[&str] = &[
    "rhel-imagestreams",
    "service-catalog",
    "template-service-broker",
];

pub const REGISTRY_SERVICE_IP: &str = "172.30.1.1";
pub const SERVICE_CATALOG_SERVICE_IP: &str = "172.30.1.2";

// ---------------------------------------------------------------------------
// Enablement
// ---------------------------------------------------------------------------

/// Whether `name` is selected by `requested`.
///
/// The first entry naming the component decides: `name` enables it, `-name`
/// disables it. Without an explicit entry, `*` enables every component that
/// is not disabled by default. With neither, nothing is enabled.
pub fn is_component_enabled(name: &str, requested: &[String]) -> bool {
    let mut star = false;
    for r in requested {
        if r == name {
            return true;
        }
        if r.strip_prefix('-') == Some(name) {
            return false;
        }
        if r == "*" {
            star = true;
        }
    }
    star && !DISABLED_BY_DEFAULT.contains(&name)
}

/// Known components selected by `requested`, in catalog order.
pub fn enabled_components(requested: &[String]) -> Vec<String> {
    KNOWN_COMPONENTS
        .iter()
        .filter(|c| is_component_enabled(c, requested))
        .map(|c| c.to_string())
        .collect()
}

/// Anything other than the default selection is refused once the cluster
/// has been initialized.
pub fn check_enable_allowed(base: &Path, requested: &[String]) -> Result<()> {
    let default_only = !requested.is_empty() && requested.iter().all(|r| r == "*");
    if !default_only && base.join(paths::ETCD_DIR).exists() {
        return Err(Fatal::new("cannot use --enable when the cluster is already initialized")
            .with_solution("use 'clusterup add <component>' instead")
            .into());
    }
    Ok(())
}

pub fn validate_names(names: &[String]) -> Result<()> {
    match names.iter().find(|n| !KNOWN_COMPONENTS.contains(&n.as_str())) {
        Some(unknown) => Err(ClusterUpError::UnknownComponent(unknown.clone())),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Run levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLevel {
    /// Networking the control plane depends on.
    Zero,
    /// The aggregated API servers and their controllers.
    One,
}

impl RunLevel {
    pub fn components(self) -> &'static [&'static str] {
        match self {
            RunLevel::Zero => &["kube-proxy", "kube-dns"],
            RunLevel::One => &["openshift-apiserver", "openshift-controller-manager"],
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Builds components against one install context.
pub struct Catalog {
    ctx: Arc<InstallContext>,
    layout: HostLayout,
    routing_suffix: String,
    server_url: String,
    cluster: Option<Arc<dyn ClusterApi>>,
}

impl Catalog {
    pub fn new(ctx: Arc<InstallContext>, layout: HostLayout, state: &ClusterState, api_port: u16) -> Self {
        Self {
            ctx,
            layout,
            routing_suffix: state.routing_suffix.clone(),
            server_url: state.server_url(api_port),
            cluster: None,
        }
    }

    /// Attach deployment readiness checks that query `cluster`.
    pub fn with_readiness(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn components(&self, names: &[String]) -> Result<Vec<Component>> {
        names.iter().map(|n| self.component(n)).collect()
    }

    pub fn run_level(&self, level: RunLevel) -> Result<Vec<Component>> {
        level.components().iter().map(|n| self.run_level_component(n)).collect()
    }

    pub fn component(&self, name: &str) -> Result<Component> {
        let ctx = &self.ctx;
        let log_level = ctx.server_log_level.to_string();
        let pv_dir = self.layout.host_dir(paths::PV_DIR).display().to_string();

        let component = match name {
            "centos-imagestreams" | "rhel-imagestreams" => Component::list(
                name,
                List::new(ctx.clone(), "openshift", asset(&format!("components/{name}.yaml"))),
            ),
            "sample-templates" => Component::composite(
                list("components/sample-templates")
                    .into_iter()
                    .map(|path| {
                        let member = path
                            .trim_start_matches("components/")
                            .trim_end_matches(".yaml")
                            .to_string();
                        Component::list(member, List::new(ctx.clone(), "openshift", asset(&path)))
                    })
                    .collect(),
            ),
            "registry" => {
                let t = Template::new(ctx.clone(), "default", asset("components/registry/install.yaml"))
                    .privileged(["registry"])
                    .param("IMAGE", ctx.image("docker-registry")?)
                    .param("NAMESPACE", "default")
                    .param("PORTAL_IP", REGISTRY_SERVICE_IP)
                    .param("PV_HOST_DIR", &pv_dir);
                Component::template(name, self.ready(t, "default", "docker-registry"))
            }
            "router" => {
                let t = Template::new(ctx.clone(), "default", asset("components/router/install.yaml"))
                    .privileged(["router"])
                    .param("IMAGE", ctx.image("haproxy-router")?)
                    .param("NAMESPACE", "default")
                    .param("ROUTING_SUFFIX", &self.routing_suffix);
                Component::template(name, self.ready(t, "default", "router"))
            }
            "persistent-volumes" => Component::template(
                name,
                Template::new(ctx.clone(), "default", asset("components/persistent-volumes/install.yaml"))
                    .privileged(["pvinstaller"])
                    .param("IMAGE", ctx.client_image.clone())
                    .param("PV_HOST_DIR", &pv_dir),
            ),
            "service-catalog" => {
                let ns = "kube-service-catalog";
                let t = Template::new(ctx.clone(), ns, asset("components/service-catalog/install.yaml"))
                    .privileged(["service-catalog-apiserver", "service-catalog-controller"])
                    .namespace_object(asset("components/service-catalog/namespace.yaml"))
                    .rbac(asset("components/service-catalog/rbac.yaml"))
                    .param("IMAGE", ctx.image("service-catalog")?)
                    .param("NAMESPACE", ns)
                    .param("SERVICE_IP", SERVICE_CATALOG_SERVICE_IP)
                    .param("LOGLEVEL", &log_level);
                Component::template(name, self.ready(t, ns, "apiserver"))
            }
            "template-service-broker" => {
                let ns = "openshift-template-service-broker";
                let t = Template::new(ctx.clone(), ns, asset("components/template-service-broker/install.yaml"))
                    .rbac(asset("components/template-service-broker/rbac.yaml"))
                    .param("IMAGE", ctx.image("template-service-broker")?)
                    .param("NAMESPACE", ns)
                    .param("LOGLEVEL", &log_level);
                Component::template(name, self.ready(t, ns, "apiserver"))
            }
            "web-console" => {
                let ns = "openshift-web-console";
                let t = Template::new(ctx.clone(), ns, asset("components/web-console/install.yaml"))
                    .rbac(asset("components/web-console/rbac.yaml"))
                    .param("IMAGE", ctx.image("web-console")?)
                    .param("NAMESPACE", ns)
                    .param("API_SERVER_URL", &self.server_url)
                    .param("CONSOLE_URL", format!("{}/console/", self.server_url))
                    .param("LOGLEVEL", &log_level);
                Component::template(name, self.ready(t, ns, "webconsole"))
            }
            other => return Err(ClusterUpError::UnknownComponent(other.to_string())),
        };
        Ok(component)
    }

    fn run_level_component(&self, name: &str) -> Result<Component> {
        let ctx = &self.ctx;
        let install = asset(&format!("runlevels/{name}/install.yaml"));
        let template = Template::new(ctx.clone(), name, install)
            .privileged([name])
            .param("NAMESPACE", name)
            .param("LOGLEVEL", ctx.server_log_level.to_string());

        let template = match name {
            "kube-proxy" => template
                .param("IMAGE", ctx.image("control-plane")?)
                .param("NODE_CONFIG_HOST_DIR", self.host_dir(paths::NODE_DIR)),
            "kube-dns" => template
                .param("IMAGE", ctx.image("control-plane")?)
                .param("DNS_CONFIG_HOST_DIR", self.host_dir(paths::KUBE_DNS_DIR)),
            "openshift-apiserver" | "openshift-controller-manager" => template
                .param("IMAGE", ctx.image("hypershift")?)
                .param("MASTER_CONFIG_HOST_DIR", self.host_dir(paths::KUBE_APISERVER_DIR)),
            other => return Err(ClusterUpError::UnknownComponent(other.to_string())),
        };
        Ok(Component::template(name, template))
    }

    fn host_dir(&self, name: &str) -> String {
        self.layout.host_dir(name).display().to_string()
    }

    fn ready(&self, template: Template, namespace: &str, deployment: &str) -> Template {
        match &self.cluster {
            Some(cluster) => template.ready_when(Readiness::deployment(cluster.clone(), namespace, deployment)),
            None => template,
        }
    }
}
