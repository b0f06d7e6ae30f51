//! In-memory doubles for the engine and cluster boundaries.

use async_trait::async_trait;
use bytes::Bytes;
use kube::api::DynamicObject;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::cluster::{ApiCondition, ApiServiceInfo, ClusterApi, ClusterError};
use crate::component::COMPONENT_LABEL;
use crate::context::InstallContext;
use crate::engine::{
    CapturedOutput, ContainerEngine, ContainerSpec, ContainerState, ContainerSummary, DaemonInfo,
    EngineError,
};
use crate::image::{ImageTemplate, PullPolicy};

pub fn test_context(base: &Path) -> InstallContext {
    let template = ImageTemplate::default()
        .with_version(None)
        .expect("default template");
    InstallContext::new(
        Bytes::from_static(b"apiVersion: v1\nkind: Config\n"),
        base,
        template,
    )
    .expect("context")
}

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create(String),
    Upload(String),
    Start(String),
    Wait(String),
    Logs(String),
    Download(String, String),
    Stop(String),
    Remove(String),
    Inspect(String),
    ListManaged,
    EnsureImage(String),
    Info,
}

#[derive(Default)]
struct EngineState {
    next_id: usize,
    calls: Vec<EngineCall>,
    specs: Vec<ContainerSpec>,
    uploads: HashMap<String, Bytes>,
    exits: VecDeque<(i64, CapturedOutput)>,
    component_exits: HashMap<String, (i64, CapturedOutput)>,
    outputs: HashMap<String, (i64, CapturedOutput)>,
    create_failures: VecDeque<String>,
    downloads: HashMap<String, Bytes>,
    containers: HashMap<String, ContainerState>,
    managed: Vec<ContainerSummary>,
    info: DaemonInfo,
    remote: bool,
}

/// Records every call; containers exit 0 with empty output unless scripted.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn remote() -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().remote = true;
        Arc::new(fake)
    }

    /// Queue the outcome of the next `wait` on a container without a
    /// component-specific outcome.
    pub fn script_exit(&self, code: i64, stdout: &str, stderr: &str) {
        self.state.lock().unwrap().exits.push_back((code, output(stdout, stderr)));
    }

    /// Every container labeled for `component` exits with `code`.
    pub fn fail_component(&self, component: &str, code: i64, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .component_exits
            .insert(component.to_string(), (code, output("", stderr)));
    }

    pub fn fail_next_create(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .push_back(message.to_string());
    }

    /// Archive returned by `download` of `path` from any container.
    pub fn set_download(&self, path: &str, archive: Bytes) {
        self.state
            .lock()
            .unwrap()
            .downloads
            .insert(path.to_string(), archive);
    }

    pub fn set_container(&self, name: &str, running: bool) {
        self.state.lock().unwrap().containers.insert(
            name.to_string(),
            ContainerState {
                id: format!("{name}-id"),
                running,
                status: if running { "running" } else { "exited" }.to_string(),
            },
        );
    }

    pub fn add_managed(&self, id: &str, name: &str) {
        self.state.lock().unwrap().managed.push(ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            state: "running".to_string(),
        });
    }

    pub fn set_info(&self, info: DaemonInfo) {
        self.state.lock().unwrap().info = info;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    /// Entry names of the archive uploaded to the `n`th created container.
    pub fn uploaded_files(&self, n: usize) -> Vec<String> {
        self.uploaded_archive(n)
            .map(|tar| {
                tar::Archive::new(tar.as_ref())
                    .entries()
                    .expect("entries")
                    .map(|e| e.expect("entry").path().expect("path").display().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Content of `path` in the archive uploaded to the `n`th container.
    pub fn uploaded_file(&self, n: usize, path: &str) -> Option<String> {
        let tar = self.uploaded_archive(n)?;
        let wanted = path.trim_start_matches('/');
        let mut archive = tar::Archive::new(tar.as_ref());
        for entry in archive.entries().expect("entries") {
            let mut entry = entry.expect("entry");
            if entry.path().expect("path").to_str() == Some(wanted) {
                let mut s = String::new();
                entry.read_to_string(&mut s).expect("utf8");
                return Some(s);
            }
        }
        None
    }

    fn uploaded_archive(&self, n: usize) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(&format!("ctr-{n}"))
            .cloned()
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn output(stdout: &str, stderr: &str) -> CapturedOutput {
    CapturedOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Create(spec.image.clone()));
        if let Some(message) = state.create_failures.pop_front() {
            return Err(EngineError::Other(message));
        }
        let id = format!("ctr-{}", state.next_id);
        state.next_id += 1;
        state.specs.push(spec.clone());
        if let Some(name) = &spec.name {
            state.containers.insert(
                name.clone(),
                ContainerState {
                    id: id.clone(),
                    running: false,
                    status: "created".to_string(),
                },
            );
        }
        Ok(id)
    }

    async fn upload(&self, id: &str, archive: Bytes) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Upload(id.to_string()));
        state.uploads.insert(id.to_string(), archive);
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Start(id.to_string()));
        for c in state.containers.values_mut() {
            if c.id == id {
                c.running = true;
                c.status = "running".to_string();
            }
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Wait(id.to_string()));
        let index: usize = id.trim_start_matches("ctr-").parse().unwrap_or(0);
        let component = state
            .specs
            .get(index)
            .and_then(|s| s.labels.get(COMPONENT_LABEL))
            .cloned();
        let outcome = component
            .and_then(|c| state.component_exits.get(&c).cloned())
            .or_else(|| state.exits.pop_front())
            .unwrap_or_default();
        let code = outcome.0;
        state.outputs.insert(id.to_string(), outcome);
        Ok(code)
    }

    async fn logs(&self, id: &str) -> Result<CapturedOutput, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Logs(id.to_string()));
        Ok(state
            .outputs
            .get(id)
            .map(|(_, o)| o.clone())
            .unwrap_or_default())
    }

    async fn download(&self, id: &str, path: &str) -> Result<Bytes, EngineError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(EngineCall::Download(id.to_string(), path.to_string()));
        state
            .downloads
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::Other(format!("no such path {path}")))
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        self.record(EngineCall::Stop(id.to_string()));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.record(EngineCall::Remove(id.to_string()));
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Inspect(name.to_string()));
        Ok(state.containers.get(name).cloned())
    }

    async fn list_managed(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::ListManaged);
        Ok(state.managed.clone())
    }

    async fn ensure_image(&self, image: &str, _policy: PullPolicy) -> Result<(), EngineError> {
        self.record(EngineCall::EnsureImage(image.to_string()));
        Ok(())
    }

    async fn info(&self) -> Result<DaemonInfo, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Info);
        Ok(state.info.clone())
    }

    fn is_remote(&self) -> bool {
        self.state.lock().unwrap().remote
    }
}

// ---------------------------------------------------------------------------
// RecordingCluster
// ---------------------------------------------------------------------------

/// Mutating cluster calls, in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    GrantPrivileged(Vec<String>),
    EnsureNamespace(String),
    Apply {
        names: Vec<String>,
        namespace: Option<String>,
    },
    Reconcile {
        names: Vec<String>,
        namespace: Option<String>,
    },
    AddRedirectUri {
        client: String,
        uri: String,
    },
}

#[derive(Default)]
struct ClusterState {
    calls: Vec<ClusterCall>,
    api_services: BTreeMap<String, bool>,
    probes: HashMap<String, u16>,
    ready_deployments: Vec<(String, String)>,
    users: Vec<String>,
    user_lookup_fails: bool,
    oauth_clients: BTreeMap<String, Vec<String>>,
    apply_failures: VecDeque<ClusterError>,
}

#[derive(Default)]
pub struct RecordingCluster {
    state: Mutex<ClusterState>,
}

impl RecordingCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn add_api_service(&self, name: &str, available: bool) {
        self.state
            .lock()
            .unwrap()
            .api_services
            .insert(name.to_string(), available);
    }

    pub fn remove_api_service(&self, name: &str) {
        self.state.lock().unwrap().api_services.remove(name);
    }

    pub fn set_probe(&self, path: &str, code: u16) {
        self.state
            .lock()
            .unwrap()
            .probes
            .insert(path.to_string(), code);
    }

    pub fn set_deployment_ready(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .ready_deployments
            .push((namespace.to_string(), name.to_string()));
    }

    pub fn add_user(&self, name: &str) {
        self.state.lock().unwrap().users.push(name.to_string());
    }

    /// Make every user lookup fail with a server error.
    pub fn fail_user_lookup(&self) {
        self.state.lock().unwrap().user_lookup_fails = true;
    }

    pub fn add_oauth_client(&self, name: &str, redirect_uris: &[&str]) {
        self.state.lock().unwrap().oauth_clients.insert(
            name.to_string(),
            redirect_uris.iter().map(|u| u.to_string()).collect(),
        );
    }

    pub fn redirect_uris(&self, client: &str) -> Option<Vec<String>> {
        self.state.lock().unwrap().oauth_clients.get(client).cloned()
    }

    /// The next apply call fails with `err` instead of being recorded.
    pub fn fail_next_apply(&self, err: ClusterError) {
        self.state.lock().unwrap().apply_failures.push_back(err);
    }
}

fn names(objects: &[DynamicObject]) -> Vec<String> {
    objects
        .iter()
        .filter_map(|o| o.metadata.name.clone())
        .collect()
}

#[async_trait]
impl ClusterApi for RecordingCluster {
    async fn grant_privileged(&self, users: &[String]) -> Result<(), ClusterError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(ClusterCall::GrantPrivileged(users.to_vec()));
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), ClusterError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(ClusterCall::EnsureNamespace(name.to_string()));
        Ok(())
    }

    async fn apply_objects(
        &self,
        objects: &[DynamicObject],
        namespace: Option<&str>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.apply_failures.pop_front() {
            return Err(err);
        }
        state.calls.push(ClusterCall::Apply {
            names: names(objects),
            namespace: namespace.map(String::from),
        });
        Ok(())
    }

    async fn reconcile_rbac(
        &self,
        objects: &[DynamicObject],
        namespace: Option<&str>,
    ) -> Result<(), ClusterError> {
        self.state.lock().unwrap().calls.push(ClusterCall::Reconcile {
            names: names(objects),
            namespace: namespace.map(String::from),
        });
        Ok(())
    }

    async fn list_api_services(&self) -> Result<Vec<ApiServiceInfo>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .api_services
            .iter()
            .map(|(name, available)| {
                let (version, group) = name.split_once('.').unwrap_or((name.as_str(), ""));
                ApiServiceInfo {
                    name: name.clone(),
                    group: group.to_string(),
                    version: version.to_string(),
                    conditions: vec![ApiCondition {
                        type_: "Available".to_string(),
                        status: if *available { "True" } else { "False" }.to_string(),
                    }],
                }
            })
            .collect())
    }

    async fn probe(&self, path: &str) -> Result<u16, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .probes
            .get(path)
            .copied()
            .unwrap_or(404))
    }

    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ready_deployments
            .iter()
            .any(|(ns, n)| ns == namespace && n == name))
    }

    async fn user_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.user_lookup_fails {
            return Err(ClusterError::NotFound("users.user.openshift.io".to_string()));
        }
        Ok(state.users.iter().any(|u| u == name))
    }

    async fn add_redirect_uri(&self, client: &str, uri: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let uris = state
            .oauth_clients
            .get_mut(client)
            .ok_or_else(|| ClusterError::NotFound(format!("oauthclients/{client}")))?;
        if uris.iter().any(|u| u == uri) {
            return Ok(false);
        }
        uris.push(uri.to_string());
        state.calls.push(ClusterCall::AddRedirectUri {
            client: client.to_string(),
            uri: uri.to_string(),
        });
        Ok(true)
    }
}
