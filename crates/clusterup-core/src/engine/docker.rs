use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::HashMap;

use super::{
    CapturedOutput, ContainerEngine, ContainerSpec, ContainerState, ContainerSummary, DaemonInfo,
    EngineError, MANAGED_LABEL,
};
use crate::image::PullPolicy;

/// [`ContainerEngine`] backed by a Docker-compatible daemon.
pub struct DockerEngine {
    docker: Docker,
    remote: bool,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` (or the local socket when unset).
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_defaults().map_err(EngineError::api("connect"))?;
        let remote = std::env::var("DOCKER_HOST")
            .map(|h| is_remote_host(&h))
            .unwrap_or(false);
        Ok(Self { docker, remote })
    }
}

/// A host is remote unless it is a unix socket or a named pipe.
pub(crate) fn is_remote_host(host: &str) -> bool {
    let host = host.trim();
    !(host.is_empty() || host.starts_with("unix://") || host.starts_with("npipe://"))
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let host_config = HostConfig {
            privileged: Some(spec.privileged),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: spec.host_network.then(|| "host".to_string()),
            pid_mode: spec.host_pid.then(|| "host".to_string()),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            labels: Some(
                spec.labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<HashMap<_, _>>(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let created = self
            .docker
            .create_container(options, config)
            .await
            .map_err(EngineError::api("create"))?;
        for warning in &created.warnings {
            tracing::warn!(container = %created.id, "{warning}");
        }
        Ok(created.id)
    }

    async fn upload(&self, id: &str, archive: Bytes) -> Result<(), EngineError> {
        let options = UploadToContainerOptions {
            path: "/".to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive)
            .await
            .map_err(EngineError::api("upload"))
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(EngineError::api("start"))
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        let mut code = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(resp) => code = resp.status_code,
                // bollard reports a non-zero exit as an error carrying the code
                Err(BollardError::DockerContainerWaitError { code: c, .. }) => code = c,
                Err(e) => return Err(EngineError::Api { op: "wait", source: e }),
            }
        }
        Ok(code)
    }

    async fn logs(&self, id: &str) -> Result<CapturedOutput, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut out = CapturedOutput::default();
        while let Some(item) = stream.next().await {
            match item.map_err(EngineError::api("logs"))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    out.stdout.push_str(&String::from_utf8_lossy(&message))
                }
                LogOutput::StdErr { message } => {
                    out.stderr.push_str(&String::from_utf8_lossy(&message))
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(out)
    }

    async fn download(&self, id: &str, path: &str) -> Result<Bytes, EngineError> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk.map_err(EngineError::api("download"))?);
        }
        Ok(buf.freeze())
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) if is_not_found(&e) => Err(EngineError::NotFound(id.to_string())),
            Err(e) => Err(EngineError::Api { op: "stop", source: e }),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(EngineError::NotFound(id.to_string())),
            Err(e) => Err(EngineError::Api {
                op: "remove",
                source: e,
            }),
        }
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, EngineError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => {
                let state = resp.state.unwrap_or_default();
                Ok(Some(ContainerState {
                    id: resp.id.unwrap_or_default(),
                    running: state.running.unwrap_or(false),
                    status: state.status.map(|s| s.to_string()).unwrap_or_default(),
                }))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(EngineError::Api {
                op: "inspect",
                source: e,
            }),
        }
    }

    async fn list_managed(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(EngineError::api("list"))?;

        let mut managed = Vec::new();
        for c in containers {
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();
            let labeled = c
                .labels
                .as_ref()
                .is_some_and(|l| l.get(MANAGED_LABEL).map(String::as_str) == Some("true"));
            if labeled || name.starts_with("k8s_") {
                managed.push(ContainerSummary {
                    id: c.id.unwrap_or_default(),
                    name,
                    state: c.state.unwrap_or_default(),
                });
            }
        }
        Ok(managed)
    }

    async fn ensure_image(&self, image: &str, policy: PullPolicy) -> Result<(), EngineError> {
        if policy != PullPolicy::Always {
            match self.docker.inspect_image(image).await {
                Ok(_) => return Ok(()),
                Err(e) if is_not_found(&e) => {
                    if policy == PullPolicy::Never {
                        return Err(EngineError::Other(format!(
                            "image {image} is not present and pull policy is Never"
                        )));
                    }
                }
                Err(e) => {
                    return Err(EngineError::Api {
                        op: "inspect image",
                        source: e,
                    })
                }
            }
        }

        tracing::info!(image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(EngineError::api("pull"))?;
            if let Some(status) = progress.status {
                tracing::trace!(image, "{status}");
            }
        }
        Ok(())
    }

    async fn info(&self) -> Result<DaemonInfo, EngineError> {
        let info = self.docker.info().await.map_err(EngineError::api("info"))?;
        Ok(DaemonInfo {
            root_dir: info.docker_root_dir.unwrap_or_default(),
            insecure_registry_cidrs: info
                .registry_config
                .and_then(|r| r.insecure_registry_cidrs)
                .unwrap_or_default(),
            http_proxy: info.http_proxy.unwrap_or_default(),
            https_proxy: info.https_proxy.unwrap_or_default(),
            no_proxy: info.no_proxy.unwrap_or_default(),
            security_options: info.security_options.unwrap_or_default(),
        })
    }

    fn is_remote(&self) -> bool {
        self.remote
    }
}
