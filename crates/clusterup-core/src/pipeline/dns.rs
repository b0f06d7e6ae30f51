//! DNS configuration derived from the node configuration.

use serde_yaml::Value;
use std::path::Path;

use crate::error::{ClusterUpError, Fatal, Result};
use crate::io::{atomic_write, copy_dir};

pub const RESOLV_CONF: &str = "resolv.conf";
pub const NODE_CONFIG: &str = "node-config.yaml";

/// Address the cluster DNS pod listens on.
pub const DNS_BIND_ADDRESS: &str = "0.0.0.0:53";

/// Copy `node_dir` to `dns_dir`, then point it at the server.
pub fn write_dns_config(
    node_dir: &Path,
    dns_dir: &Path,
    resolv_conf: &Path,
    server_ip: &str,
    server_url: &str,
) -> Result<()> {
    let resolv = std::fs::read_to_string(resolv_conf).map_err(|e| {
        Fatal::new(format!("cannot read resolver file {}", resolv_conf.display()))
            .with_cause(e)
            .with_solution("make sure the host has a readable /etc/resolv.conf")
    })?;
    copy_dir(node_dir, dns_dir)?;
    atomic_write(&dns_dir.join(RESOLV_CONF), rewrite_resolv_conf(&resolv, server_ip).as_bytes())?;

    let node_config = dns_dir.join(NODE_CONFIG);
    if node_config.exists() {
        let data = std::fs::read_to_string(&node_config)?;
        atomic_write(&node_config, rewrite_node_config(&data)?.as_bytes())?;
    }

    for entry in std::fs::read_dir(dns_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "kubeconfig") {
            let data = std::fs::read_to_string(&path)?;
            atomic_write(&path, rewrite_kubeconfig_server(&data, server_url)?.as_bytes())?;
        }
    }
    Ok(())
}

/// Replace loopback nameservers, which are unreachable from pods, with the
/// server IP.
pub fn rewrite_resolv_conf(input: &str, server_ip: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("nameserver"), Some(ns)) if is_loopback(ns) => {
                out.push_str("nameserver ");
                out.push_str(server_ip);
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn is_loopback(addr: &str) -> bool {
    addr.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

pub fn rewrite_node_config(input: &str) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(input)?;
    let map = doc
        .as_mapping_mut()
        .ok_or_else(|| ClusterUpError::InvalidManifest("node config is not a mapping".to_string()))?;
    map.insert("dnsBindAddress".into(), DNS_BIND_ADDRESS.into());
    map.insert("dnsRecursiveResolvConf".into(), RESOLV_CONF.into());
    Ok(serde_yaml::to_string(&doc)?)
}

/// Point every cluster entry of a kubeconfig at `server_url`.
pub fn rewrite_kubeconfig_server(input: &str, server_url: &str) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(input)?;
    if let Some(clusters) = doc.get_mut("clusters").and_then(Value::as_sequence_mut) {
        for entry in clusters {
            if let Some(cluster) = entry.get_mut("cluster").and_then(Value::as_mapping_mut) {
                cluster.insert("server".into(), server_url.into());
            }
        }
    }
    Ok(serde_yaml::to_string(&doc)?)
}
