//! Waiting for the control plane and its aggregated APIs.

use std::collections::BTreeSet;

use crate::cluster::{ClusterApi, ClusterError};
use crate::wait::{poll_until, PollPolicy, WaitError};

/// Aggregated API groups served by the control plane once run-level 1 is up.
pub const CORE_APIS: &[&str] = &[
    "v1.apps.openshift.io",
    "v1.authorization.openshift.io",
    "v1.build.openshift.io",
    "v1.image.openshift.io",
    "v1.network.openshift.io",
    "v1.oauth.openshift.io",
    "v1.project.openshift.io",
    "v1.quota.openshift.io",
    "v1.route.openshift.io",
    "v1.security.openshift.io",
    "v1.template.openshift.io",
    "v1.user.openshift.io",
];

/// One observation of the required API services.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApiReport {
    pub found: BTreeSet<String>,
    pub unready: BTreeSet<String>,
    pub failed_probes: BTreeSet<String>,
}

/// Check every required API service once.
///
/// Ready only when every required name is present, each has an `Available`
/// condition of `True`, and each discovery endpoint answers 200. Probes are
/// skipped until the first two conditions hold.
pub async fn check_apis(api: &dyn ClusterApi, required: &[&str]) -> Result<(bool, ApiReport), ClusterError> {
    let required: BTreeSet<&str> = required.iter().copied().collect();
    let services = api.list_api_services().await?;

    let mut report = ApiReport::default();
    let mut matched = Vec::new();
    for svc in services {
        if !required.contains(svc.name.as_str()) {
            continue;
        }
        if !svc.is_available() {
            report.unready.insert(svc.name.clone());
        }
        report.found.insert(svc.name.clone());
        matched.push(svc);
    }

    if !report.unready.is_empty() || report.found.len() != required.len() {
        return Ok((false, report));
    }

    for svc in &matched {
        let code = api.probe(&svc.discovery_path()).await?;
        if code != 200 {
            report.failed_probes.insert(svc.name.clone());
        }
    }
    Ok((report.failed_probes.is_empty(), report))
}

/// Poll [`check_apis`] until ready or `policy.timeout` elapses.
pub async fn wait_for_apis(api: &dyn ClusterApi, required: &[&str], policy: PollPolicy) -> Result<(), WaitError> {
    tracing::info!(count = required.len(), "waiting for API services");
    poll_until("API services to become available", policy, || async {
        let (ready, report) = check_apis(api, required).await?;
        if !ready {
            let missing: Vec<&str> = required
                .iter()
                .copied()
                .filter(|r| !report.found.contains(*r))
                .collect();
            tracing::debug!(
                missing = ?missing,
                unready = ?report.unready,
                failed_probes = ?report.failed_probes,
                "API services not ready"
            );
        }
        Ok::<_, ClusterError>(ready)
    })
    .await
}

/// Poll `/healthz` until it answers 200.
pub async fn wait_for_healthy(api: &dyn ClusterApi, policy: PollPolicy) -> Result<(), WaitError> {
    tracing::info!("waiting for the control plane to become healthy");
    poll_until("control plane health", policy, || async {
        match api.probe("/healthz").await {
            Ok(code) => Ok(code == 200),
            // the server may not accept connections yet
            Err(ClusterError::Kube(e)) => {
                tracing::trace!(error = %e, "health probe failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingCluster;
    use std::time::Duration;

    const REQUIRED: &[&str] = &["v1.apps.openshift.io", "v1.route.openshift.io"];

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(1), Duration::from_secs(300))
    }

    fn healthy_cluster() -> std::sync::Arc<RecordingCluster> {
        let cluster = RecordingCluster::new();
        cluster.add_api_service("v1.apps.openshift.io", true);
        cluster.add_api_service("v1.route.openshift.io", true);
        cluster.add_api_service("v1.metrics.k8s.io", false);
        cluster.set_probe("/apis/apps.openshift.io/v1", 200);
        cluster.set_probe("/apis/route.openshift.io/v1", 200);
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_when_all_conditions_hold() {
        let cluster = healthy_cluster();
        wait_for_apis(cluster.as_ref(), REQUIRED, policy()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_times_out() {
        let cluster = healthy_cluster();
        cluster.remove_api_service("v1.route.openshift.io");
        let err = wait_for_apis(cluster.as_ref(), REQUIRED, policy()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_service_times_out() {
        let cluster = healthy_cluster();
        cluster.add_api_service("v1.route.openshift.io", false);
        let err = wait_for_apis(cluster.as_ref(), REQUIRED, policy()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_times_out() {
        let cluster = healthy_cluster();
        cluster.set_probe("/apis/route.openshift.io/v1", 503);
        let err = wait_for_apis(cluster.as_ref(), REQUIRED, policy()).await.unwrap_err();
        assert!(err.is_timeout());

        let (ready, report) = check_apis(cluster.as_ref(), REQUIRED).await.unwrap();
        assert!(!ready);
        assert_eq!(
            report.failed_probes.into_iter().collect::<Vec<_>>(),
            vec!["v1.route.openshift.io".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_ready_after_service_registers() {
        let cluster = healthy_cluster();
        cluster.remove_api_service("v1.route.openshift.io");
        let later = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            later.add_api_service("v1.route.openshift.io", true);
        });
        wait_for_apis(cluster.as_ref(), REQUIRED, policy()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn healthz_polls_until_ok() {
        let cluster = RecordingCluster::new();
        cluster.set_probe("/healthz", 500);
        let later = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            later.set_probe("/healthz", 200);
        });
        wait_for_healthy(cluster.as_ref(), policy()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn healthz_times_out() {
        let cluster = RecordingCluster::new();
        cluster.set_probe("/healthz", 503);
        let err = wait_for_healthy(cluster.as_ref(), PollPolicy::new(Duration::from_secs(1), Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "timed out after 30s waiting for control plane health");
    }
}
