use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiResource, Scope};
use kube::{Client, Config};
use serde_json::{json, Value};

use super::{parse_api_version, rbac, ApiCondition, ApiServiceInfo, ClusterApi, ClusterError};

const FIELD_MANAGER: &str = "clusterup";

/// [`ClusterApi`] over a `kube` client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the admin kubeconfig written by the control plane.
    pub async fn from_kubeconfig(data: &[u8]) -> Result<Self, ClusterError> {
        let text = String::from_utf8_lossy(data);
        let kubeconfig = Kubeconfig::from_yaml(&text)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    /// Resolve the dynamic API for `obj`, honoring its scope.
    async fn dynamic_api(
        &self,
        obj: &DynamicObject,
        namespace: Option<&str>,
    ) -> Result<(Api<DynamicObject>, String), ClusterError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidManifest("object without apiVersion or kind".into()))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::InvalidManifest(format!("{} without metadata.name", types.kind)))?;
        let (group, version) = parse_api_version(&types.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &types.kind);
        let (resource, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|source| ClusterError::Discovery {
                api_version: types.api_version.clone(),
                kind: types.kind.clone(),
                source,
            })?;

        let api = match caps.scope {
            Scope::Namespaced => {
                let ns = obj
                    .metadata
                    .namespace
                    .as_deref()
                    .or(namespace)
                    .unwrap_or("default");
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };
        Ok((api, name))
    }
}

fn scc_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("security.openshift.io", "v1", "SecurityContextConstraints");
    ApiResource::from_gvk_with_plural(&gvk, "securitycontextconstraints")
}

fn user_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("user.openshift.io", "v1", "User");
    ApiResource::from_gvk_with_plural(&gvk, "users")
}

fn oauth_client_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("oauth.openshift.io", "v1", "OAuthClient");
    ApiResource::from_gvk_with_plural(&gvk, "oauthclients")
}

/// Top-level string array `field` of an untyped object.
fn string_list(obj: &DynamicObject, field: &str) -> Vec<String> {
    obj.data
        .get(field)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|u| u.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn grant_privileged(&self, users: &[String]) -> Result<(), ClusterError> {
        if users.is_empty() {
            return Ok(());
        }
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &scc_resource());
        let scc = api
            .get_opt("privileged")
            .await?
            .ok_or_else(|| ClusterError::NotFound("securitycontextconstraints/privileged".into()))?;

        let mut merged = string_list(&scc, "users");
        let before = merged.len();
        for user in users {
            if !merged.contains(user) {
                merged.push(user.clone());
            }
        }
        if merged.len() == before {
            return Ok(());
        }

        tracing::debug!(users = ?users, "granting privileged access");
        api.patch(
            "privileged",
            &PatchParams::default(),
            &Patch::Merge(json!({ "users": merged })),
        )
        .await?;
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_objects(
        &self,
        objects: &[DynamicObject],
        namespace: Option<&str>,
    ) -> Result<(), ClusterError> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        for obj in objects {
            let (api, name) = self.dynamic_api(obj, namespace).await?;
            api.patch(&name, &params, &Patch::Apply(obj)).await?;
            tracing::debug!(
                kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default(),
                name = %name,
                "applied"
            );
        }
        Ok(())
    }

    async fn reconcile_rbac(
        &self,
        objects: &[DynamicObject],
        namespace: Option<&str>,
    ) -> Result<(), ClusterError> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        for obj in objects {
            let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
            let (api, name) = self.dynamic_api(obj, namespace).await?;

            let desired = match api.get_opt(&name).await? {
                Some(existing) if rbac::is_rbac_kind(&kind) => {
                    let merged = rbac::merge(
                        &kind,
                        &serde_json::to_value(&existing)?,
                        &serde_json::to_value(obj)?,
                    );
                    serde_json::from_value::<DynamicObject>(merged)?
                }
                _ => obj.clone(),
            };
            api.patch(&name, &params, &Patch::Apply(&desired)).await?;
            tracing::debug!(kind = %kind, name = %name, "reconciled");
        }
        Ok(())
    }

    async fn list_api_services(&self) -> Result<Vec<ApiServiceInfo>, ClusterError> {
        let api: Api<APIService> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|svc| {
                let spec = svc.spec.unwrap_or_default();
                let conditions = svc
                    .status
                    .and_then(|s| s.conditions)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| ApiCondition {
                        type_: c.type_,
                        status: c.status,
                    })
                    .collect();
                ApiServiceInfo {
                    name: svc.metadata.name.unwrap_or_default(),
                    group: spec.group.unwrap_or_default(),
                    version: spec.version.unwrap_or_default(),
                    conditions,
                }
            })
            .collect())
    }

    async fn probe(&self, path: &str) -> Result<u16, ClusterError> {
        let request = http::Request::get(path)
            .body(Vec::new())
            .map_err(|e| ClusterError::InvalidManifest(format!("bad probe path {path}: {e}")))?;
        match self.client.request_text(request).await {
            Ok(_) => Ok(200),
            Err(kube::Error::Api(ae)) => Ok(ae.code),
            Err(e) => Err(e.into()),
        }
    }

    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let Some(deployment) = api.get_opt(name).await? else {
            return Ok(false);
        };
        let wanted = deployment.spec.and_then(|s| s.replicas).unwrap_or(1);
        let available = deployment
            .status
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        Ok(available >= wanted && available > 0)
    }

    async fn user_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &user_resource());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn add_redirect_uri(&self, client: &str, uri: &str) -> Result<bool, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &oauth_client_resource());
        let existing = api
            .get_opt(client)
            .await?
            .ok_or_else(|| ClusterError::NotFound(format!("oauthclients/{client}")))?;

        let mut uris = string_list(&existing, "redirectURIs");
        if uris.iter().any(|u| u == uri) {
            return Ok(false);
        }
        uris.push(uri.to_string());
        api.patch(
            client,
            &PatchParams::default(),
            &Patch::Merge(json!({ "redirectURIs": uris })),
        )
        .await?;
        tracing::debug!(client, uri, "added OAuth redirect URI");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cluster_for(server: &mockito::ServerGuard) -> KubeCluster {
        let config = Config::new(server.url().parse().unwrap());
        KubeCluster::new(Client::try_from(config).unwrap())
    }

    #[tokio::test]
    async fn probe_reports_status_codes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;
        server
            .mock("GET", "/apis/route.openshift.io/v1")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"service unavailable","reason":"ServiceUnavailable","code":503}"#)
            .create_async()
            .await;

        let cluster = cluster_for(&server).await;
        assert_eq!(cluster.probe("/healthz").await.unwrap(), 200);
        assert_eq!(cluster.probe("/apis/route.openshift.io/v1").await.unwrap(), 503);
    }

    #[tokio::test]
    async fn api_services_carry_conditions() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/apis/apiregistration.k8s.io/v1/apiservices".into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "apiVersion": "apiregistration.k8s.io/v1",
                    "kind": "APIServiceList",
                    "metadata": {},
                    "items": [{
                        "metadata": {"name": "v1.apps.openshift.io"},
                        "spec": {"group": "apps.openshift.io", "version": "v1", "groupPriorityMinimum": 9900, "versionPriority": 15},
                        "status": {"conditions": [{"type": "Available", "status": "True"}]}
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let cluster = cluster_for(&server).await;
        let services = cluster.list_api_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "v1.apps.openshift.io");
        assert!(services[0].is_available());
        assert_eq!(services[0].discovery_path(), "/apis/apps.openshift.io/v1");
    }

    #[tokio::test]
    async fn existing_namespace_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Regex(r"^/api/v1/namespaces".into()))
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"namespaces \"openshift\" already exists","reason":"AlreadyExists","code":409}"#)
            .create_async()
            .await;

        let cluster = cluster_for(&server).await;
        cluster.ensure_namespace("openshift").await.unwrap();
    }

    #[tokio::test]
    async fn missing_deployment_is_not_ready() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/apis/apps/v1/namespaces/default/deployments/router".into()),
            )
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"not found","reason":"NotFound","code":404}"#)
            .create_async()
            .await;

        let cluster = cluster_for(&server).await;
        assert!(!cluster.deployment_ready("default", "router").await.unwrap());
    }

    #[tokio::test]
    async fn missing_user_is_reported_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/apis/user.openshift.io/v1/users/developer".into()),
            )
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"users.user.openshift.io \"developer\" not found","reason":"NotFound","code":404}"#)
            .create_async()
            .await;

        let cluster = cluster_for(&server).await;
        assert!(!cluster.user_exists("developer").await.unwrap());
    }

    fn web_console_client(uris: &[&str]) -> String {
        json!({
            "apiVersion": "oauth.openshift.io/v1",
            "kind": "OAuthClient",
            "metadata": {"name": "openshift-web-console"},
            "grantMethod": "auto",
            "redirectURIs": uris,
        })
        .to_string()
    }

    #[tokio::test]
    async fn redirect_uri_is_merged_into_the_client() {
        let mut server = mockito::Server::new_async().await;
        let path = r"^/apis/oauth.openshift.io/v1/oauthclients/openshift-web-console";
        server
            .mock("GET", mockito::Matcher::Regex(path.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(web_console_client(&["https://127.0.0.1:8443/console/"]))
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", mockito::Matcher::Regex(path.into()))
            .match_body(mockito::Matcher::Json(json!({
                "redirectURIs": ["https://127.0.0.1:8443/console/", "https://localhost:9000"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(web_console_client(&["https://127.0.0.1:8443/console/", "https://localhost:9000"]))
            .create_async()
            .await;

        let cluster = cluster_for(&server).await;
        assert!(cluster
            .add_redirect_uri("openshift-web-console", "https://localhost:9000")
            .await
            .unwrap());
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn listed_redirect_uri_is_left_alone() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/apis/oauth.openshift.io/v1/oauthclients/openshift-web-console".into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(web_console_client(&["https://localhost:9000"]))
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let cluster = cluster_for(&server).await;
        assert!(!cluster
            .add_redirect_uri("openshift-web-console", "https://localhost:9000")
            .await
            .unwrap());
        patch.assert_async().await;
    }
}
