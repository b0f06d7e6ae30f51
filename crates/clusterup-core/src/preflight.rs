//! Checks run by `up` before anything is created.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{REGISTRY_SERVICE_IP, SERVICE_CATALOG_SERVICE_IP};
use crate::config::NetworkConfig;
use crate::engine::{ContainerEngine, DaemonInfo};
use crate::error::{Fatal, Result};
use crate::image::PullPolicy;
use crate::pipeline::{remove_existing, ETCD_PORT, KUBELET_CONTAINER};
use crate::task::ContainerTask;

pub const LOOPBACK_IP: &str = "127.0.0.1";

// ---------------------------------------------------------------------------
// Existing cluster
// ---------------------------------------------------------------------------

/// Fail if the kubelet container is running; remove it if it merely exists.
pub async fn check_not_running(engine: &dyn ContainerEngine) -> Result<()> {
    let state = engine.inspect(KUBELET_CONTAINER).await.map_err(|e| {
        Fatal::new("unexpected error while checking the cluster container state").with_cause(e)
    })?;
    match state {
        Some(s) if s.running => Err(Fatal::new("the cluster is already running")
            .with_solution("stop the current cluster first:\n$ clusterup down")
            .into()),
        Some(_) => {
            remove_existing(engine, KUBELET_CONTAINER).await?;
            tracing::debug!("removed stopped kubelet container");
            Ok(())
        }
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Host ports
// ---------------------------------------------------------------------------

pub const KUBELET_PORT: u16 = 10250;
/// Cluster DNS answers on the standard port on every host address.
pub const CLUSTER_DNS_PORT: u16 = 53;
pub const ROUTER_PORTS: [u16; 2] = [80, 443];

const LISTEN_STATE: &str = "0A";

const LIST_PORTS_SCRIPT: &str =
    "cat /proc/net/tcp; if [ -e /proc/net/tcp6 ]; then cat /proc/net/tcp6; fi";

/// Ports the control plane binds on the host network.
pub fn base_ports(network: &NetworkConfig) -> Vec<u16> {
    vec![ETCD_PORT, network.api_port, network.dns_port, KUBELET_PORT]
}

/// Local ports in the LISTEN state in `/proc/net/tcp` formatted text.
/// Header lines and malformed rows are skipped.
pub fn listening_ports(proc_net_tcp: &str) -> BTreeSet<u16> {
    proc_net_tcp
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || fields[3] != LISTEN_STATE {
                return None;
            }
            let (_, port) = fields[1].rsplit_once(':')?;
            u16::from_str_radix(port, 16).ok()
        })
        .collect()
}

/// Fail when a control plane or DNS port is taken; warn about router ports.
pub fn check_ports(listening: &BTreeSet<u16>, network: &NetworkConfig) -> Result<Vec<String>> {
    let taken: Vec<String> = base_ports(network)
        .into_iter()
        .filter(|p| listening.contains(p))
        .map(|p| p.to_string())
        .collect();
    if !taken.is_empty() {
        return Err(Fatal::new("a port needed by the cluster is not available")
            .with_cause(format!("ports in use: {}", taken.join(", ")))
            .with_solution("stop the processes listening on those ports, or change them in clusterup.yaml")
            .into());
    }
    if listening.contains(&CLUSTER_DNS_PORT) {
        return Err(Fatal::new(format!("DNS port {CLUSTER_DNS_PORT} is not available"))
            .with_solution("stop the local DNS server listening on the host, then retry")
            .into());
    }
    Ok(ROUTER_PORTS
        .into_iter()
        .filter(|p| listening.contains(p))
        .map(|p| format!("Port {p} is already in use and may cause routing issues for applications."))
        .collect())
}

/// Read the host's listening sockets from a container in its network
/// namespace, then check them. Returns router port warnings.
pub async fn check_available_ports(
    engine: &Arc<dyn ContainerEngine>,
    image: &str,
    policy: PullPolicy,
    network: &NetworkConfig,
) -> Result<Vec<String>> {
    engine.ensure_image(image, policy).await?;
    let out = ContainerTask::new(image)
        .privileged()
        .host_network()
        .host_pid()
        .entrypoint(["/bin/sh"])
        .command(["-c", LIST_PORTS_SCRIPT])
        .run(engine)
        .await
        .map_err(|e| Fatal::new("cannot list the ports in use on the host").with_cause(e))?;
    let listening = listening_ports(&out.stdout);
    tracing::debug!(?listening, "host ports in use");
    check_ports(&listening, network)
}

// ---------------------------------------------------------------------------
// Insecure registry
// ---------------------------------------------------------------------------

/// The daemon must trust the in-cluster registry on the service network.
pub fn check_insecure_registry(info: &DaemonInfo, service_cidr: &str) -> Result<()> {
    if info
        .insecure_registry_cidrs
        .iter()
        .any(|c| cidr_contains(c, service_cidr))
    {
        return Ok(());
    }
    let message = if info.insecure_registry_cidrs.is_empty() {
        "the container engine is not configured with any insecure registry"
    } else {
        "the container engine's insecure registries do not include the service network"
    };
    Err(Fatal::new(message)
        .with_solution(format!(
            "restart the engine daemon with the argument:\n\t--insecure-registry {service_cidr}"
        ))
        .into())
}

/// Whether the IPv4 network `outer` covers all of `inner`.
fn cidr_contains(outer: &str, inner: &str) -> bool {
    let (Some((onet, obits)), Some((inet, ibits))) = (parse_cidr(outer), parse_cidr(inner)) else {
        return false;
    };
    if obits > ibits {
        return false;
    }
    let mask = if obits == 0 { 0 } else { u32::MAX << (32 - obits) };
    u32::from(onet) & mask == u32::from(inet) & mask
}

fn parse_cidr(s: &str) -> Option<(Ipv4Addr, u32)> {
    let (addr, bits) = s.trim().split_once('/')?;
    let bits: u32 = bits.parse().ok()?;
    if bits > 32 {
        return None;
    }
    Some((addr.parse().ok()?, bits))
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// `KUBECONFIG` must not point into the base directory, which `down` may
/// wipe and `up` regenerates.
pub fn check_kubeconfig_env(kubeconfig: Option<&str>, base: &Path) -> Result<()> {
    let Some(value) = kubeconfig else {
        return Ok(());
    };
    for entry in std::env::split_paths(value) {
        if !entry.as_os_str().is_empty() && entry.starts_with(base) {
            return Err(Fatal::new(format!(
                "KUBECONFIG points to {}, inside the base directory {}",
                entry.display(),
                base.display()
            ))
            .with_solution("unset KUBECONFIG or point it at a file outside the base directory")
            .into());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Server address
// ---------------------------------------------------------------------------

/// Public hostname when it is an IP, else the engine host's IP from a TCP
/// `DOCKER_HOST`, else loopback.
pub fn determine_ip(public_hostname: Option<&str>, docker_host: Option<&str>) -> String {
    if let Some(ip) = public_hostname.and_then(|h| h.parse::<IpAddr>().ok()) {
        if !ip.is_unspecified() {
            tracing::info!(%ip, "using public hostname IP as the server IP");
            return ip.to_string();
        }
    }
    if let Some(ip) = docker_host.and_then(docker_host_ip) {
        return ip;
    }
    LOOPBACK_IP.to_string()
}

fn docker_host_ip(host: &str) -> Option<String> {
    let rest = host.strip_prefix("tcp://")?;
    let authority = rest.split('/').next()?;
    let hostpart = authority.rsplit_once(':').map_or(authority, |(h, _)| h);
    let ip: IpAddr = hostpart.trim_matches(['[', ']']).parse().ok()?;
    Some(ip.to_string())
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Vec<String>,
}

impl ProxySettings {
    pub fn is_set(&self) -> bool {
        non_empty(&self.http_proxy).is_some() || non_empty(&self.https_proxy).is_some()
    }

    /// Add the addresses cluster traffic must reach directly.
    pub fn update_no_proxy(&mut self, server_ip: &str) {
        for v in [LOOPBACK_IP, server_ip, "localhost", SERVICE_CATALOG_SERVICE_IP, REGISTRY_SERVICE_IP] {
            if !self.no_proxy.iter().any(|n| n == v) {
                self.no_proxy.push(v.to_string());
            }
        }
    }

    /// Environment for containers that should go through the proxy.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::new();
        if let Some(p) = non_empty(&self.http_proxy) {
            env.push(("HTTP_PROXY", p.to_string()));
        }
        if let Some(p) = non_empty(&self.https_proxy) {
            env.push(("HTTPS_PROXY", p.to_string()));
        }
        if !self.no_proxy.is_empty() {
            env.push(("NO_PROXY", self.no_proxy.join(",")));
        }
        env
    }

    /// Differences between these settings and the daemon's.
    pub fn warnings(&self, daemon: &DaemonInfo) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(w) = compare("HTTP", non_empty(&self.http_proxy), &daemon.http_proxy) {
            warnings.push(w);
        }
        if let Some(w) = compare("HTTPS", non_empty(&self.https_proxy), &daemon.https_proxy) {
            warnings.push(w);
        }
        if !daemon.http_proxy.is_empty() || !daemon.https_proxy.is_empty() {
            let bypassed = daemon.no_proxy.split(',').any(|n| n.trim() == REGISTRY_SERVICE_IP);
            if !bypassed {
                warnings.push(format!(
                    "A proxy is configured for the container engine, however {REGISTRY_SERVICE_IP} is not included in its NO_PROXY list.\n   \
                     {REGISTRY_SERVICE_IP} needs to be included in the engine daemon's NO_PROXY environment variable so pushes to the local registry can succeed."
                ));
            }
        }
        warnings
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

fn compare(kind: &str, ours: Option<&str>, daemon: &str) -> Option<String> {
    match (ours, daemon.is_empty()) {
        (Some(_), true) => Some(format!(
            "You specified an {kind} proxy for the cluster, but one is not configured for the container engine"
        )),
        (None, false) => Some(format!(
            "An {kind} proxy ({daemon}) is configured for the container engine, but you did not specify one for the cluster"
        )),
        (Some(p), false) if p != daemon => Some(format!(
            "The {kind} proxy configured for the container engine ({daemon}) is not the same one you specified for the cluster"
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterUpError;
    use crate::testing::{EngineCall, FakeEngine};

    const PROC_NET_TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0035 00000000:0000 0A 00000000:00000000 00:00000000 00000000   101        0 20563 1 0000000000000000 100 0 0 10 0
   1: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 31337 1 0000000000000000 100 0 0 10 0
   2: 0A00020F:D4B2 0A000201:20FB 01 00000000:00000000 02:000A7B2C 00000000  1000        0 41234 2 0000000000000000 20 4 30 10 -1
";

    const PROC_NET_TCP6: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000000000000:01BB 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 27191 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn listening_ports_reads_only_listen_rows() {
        let text = format!("{PROC_NET_TCP}{PROC_NET_TCP6}");
        let ports: Vec<u16> = listening_ports(&text).into_iter().collect();
        // 0xD4B2 is an established client socket to 8443.
        assert_eq!(ports, vec![53, 80, 443]);
    }

    #[test]
    fn base_port_conflict_is_fatal() {
        let network = NetworkConfig::default();
        let listening = BTreeSet::from([22, 8443, 10250]);
        let err = check_ports(&listening, &network).unwrap_err();
        assert_eq!(err.to_string(), "a port needed by the cluster is not available");
        let ClusterUpError::Fatal(fatal) = &err else {
            panic!("expected a fatal error, got {err:?}");
        };
        let cause = std::error::Error::source(fatal).unwrap().to_string();
        assert_eq!(cause, "ports in use: 8443, 10250");
    }

    #[test]
    fn dns_port_conflict_is_fatal() {
        let err = check_ports(&BTreeSet::from([53]), &NetworkConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "DNS port 53 is not available");
    }

    #[test]
    fn router_ports_only_warn() {
        let warnings = check_ports(&BTreeSet::from([22, 443]), &NetworkConfig::default()).unwrap();
        assert_eq!(
            warnings,
            vec!["Port 443 is already in use and may cause routing issues for applications."]
        );
        assert!(check_ports(&BTreeSet::new(), &NetworkConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn configured_api_port_is_checked() {
        let network = NetworkConfig {
            api_port: 9443,
            ..Default::default()
        };
        check_ports(&BTreeSet::from([8443]), &network).unwrap();
        assert!(check_ports(&BTreeSet::from([9443]), &network).is_err());
    }

    #[tokio::test]
    async fn host_ports_are_read_from_a_host_network_task() {
        let fake = FakeEngine::new();
        fake.script_exit(0, PROC_NET_TCP6, "");
        let engine: Arc<dyn ContainerEngine> = fake.clone();

        let warnings = check_available_ports(
            &engine,
            "openshift/origin-control-plane:v3.11",
            PullPolicy::IfNotPresent,
            &NetworkConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(warnings.len(), 1);
        let spec = &fake.created_specs()[0];
        assert!(spec.host_network && spec.privileged);
        assert_eq!(spec.entrypoint, vec!["/bin/sh"]);
        assert!(spec.command[1].contains("/proc/net/tcp6"));
    }

    #[tokio::test]
    async fn running_kubelet_is_fatal() {
        let fake = FakeEngine::new();
        fake.set_container(KUBELET_CONTAINER, true);
        let err = check_not_running(fake.as_ref()).await.unwrap_err();
        assert_eq!(err.to_string(), "the cluster is already running");
        assert!(err.solution().unwrap().contains("clusterup down"));
    }

    #[tokio::test]
    async fn stopped_kubelet_is_removed() {
        let fake = FakeEngine::new();
        fake.set_container(KUBELET_CONTAINER, false);
        check_not_running(fake.as_ref()).await.unwrap();
        assert!(fake
            .calls()
            .contains(&EngineCall::Remove(format!("{KUBELET_CONTAINER}-id"))));
    }

    #[tokio::test]
    async fn no_kubelet_is_fine() {
        let fake = FakeEngine::new();
        check_not_running(fake.as_ref()).await.unwrap();
    }

    #[test]
    fn insecure_registry_accepts_covering_cidr() {
        let info = |cidrs: &[&str]| DaemonInfo {
            insecure_registry_cidrs: cidrs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        check_insecure_registry(&info(&["127.0.0.0/8", "172.30.0.0/16"]), "172.30.0.0/16").unwrap();
        check_insecure_registry(&info(&["172.16.0.0/12"]), "172.30.0.0/16").unwrap();

        let err = check_insecure_registry(&info(&["172.30.1.0/24"]), "172.30.0.0/16").unwrap_err();
        assert!(err.to_string().contains("do not include"));
        assert!(err.solution().unwrap().contains("--insecure-registry 172.30.0.0/16"));

        let err = check_insecure_registry(&info(&[]), "172.30.0.0/16").unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn kubeconfig_inside_base_dir_is_rejected() {
        let base = Path::new("/home/dev/clusterup.local");
        check_kubeconfig_env(None, base).unwrap();
        check_kubeconfig_env(Some("/home/dev/.kube/config"), base).unwrap();
        let err = check_kubeconfig_env(
            Some("/home/dev/.kube/config:/home/dev/clusterup.local/kube-apiserver/admin.kubeconfig"),
            base,
        )
        .unwrap_err();
        assert!(matches!(err, ClusterUpError::Fatal(_)));
    }

    #[test]
    fn determine_ip_order() {
        assert_eq!(determine_ip(Some("10.1.2.3"), Some("tcp://192.168.99.100:2376")), "10.1.2.3");
        assert_eq!(determine_ip(Some("dev.local"), Some("tcp://192.168.99.100:2376")), "192.168.99.100");
        assert_eq!(determine_ip(Some("0.0.0.0"), None), "127.0.0.1");
        assert_eq!(determine_ip(None, Some("unix:///var/run/docker.sock")), "127.0.0.1");
    }

    #[test]
    fn no_proxy_gets_cluster_addresses_once() {
        let mut proxy = ProxySettings {
            http_proxy: Some("http://proxy:3128".to_string()),
            https_proxy: None,
            no_proxy: vec!["localhost".to_string(), ".corp".to_string()],
        };
        proxy.update_no_proxy("192.168.1.10");
        proxy.update_no_proxy("192.168.1.10");
        assert_eq!(
            proxy.no_proxy,
            vec!["localhost", ".corp", "127.0.0.1", "192.168.1.10", "172.30.1.2", "172.30.1.1"]
        );
        assert_eq!(
            proxy.env(),
            vec![
                ("HTTP_PROXY", "http://proxy:3128".to_string()),
                ("NO_PROXY", "localhost,.corp,127.0.0.1,192.168.1.10,172.30.1.2,172.30.1.1".to_string()),
            ]
        );
    }

    #[test]
    fn proxy_warnings() {
        let ours = ProxySettings {
            http_proxy: Some("http://a:3128".to_string()),
            ..Default::default()
        };
        let daemon = DaemonInfo {
            http_proxy: "http://b:3128".to_string(),
            https_proxy: "http://b:3128".to_string(),
            no_proxy: "localhost".to_string(),
            ..Default::default()
        };
        let warnings = ours.warnings(&daemon);
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].starts_with("The HTTP proxy configured for the container engine (http://b:3128)"));
        assert!(warnings[1].starts_with("An HTTPS proxy (http://b:3128) is configured"));
        assert!(warnings[2].contains("172.30.1.1 is not included in its NO_PROXY list"));

        assert!(ProxySettings::default().warnings(&DaemonInfo::default()).is_empty());
    }
}
