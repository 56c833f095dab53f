// ABOUTME: Docker container backend using Bollard to resolve, create and attach session containers

use super::backend::{AttachedTty, BackendError, ContainerBackend};
use crate::config::ServerConfig;
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Label put on every container this server creates
pub const MANAGED_LABEL: &str = "webterm-managed";

/// Live sessions per container id, so cleanup waits for the last socket
#[derive(Debug, Default)]
pub(crate) struct SessionCounts {
    counts: Mutex<HashMap<String, usize>>,
}

impl SessionCounts {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a new session and return how many are now open
    pub(crate) fn acquire(&self, container_id: &str) -> usize {
        let mut counts = self.lock();
        let count = counts.entry(container_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one session; true when it was the last one for `container_id`
    pub(crate) fn release(&self, container_id: &str) -> bool {
        let mut counts = self.lock();
        match counts.get_mut(container_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(container_id);
                true
            }
            None => true,
        }
    }

    pub(crate) fn active(&self, container_id: &str) -> usize {
        self.lock().get(container_id).copied().unwrap_or(0)
    }
}

pub struct DockerBackend {
    docker: Docker,
    config: ServerConfig,
    sessions: SessionCounts,
}

impl DockerBackend {
    pub async fn new(config: ServerConfig) -> Result<Self, BackendError> {
        let docker = Self::connect_to_docker(config.docker_host.as_deref())?;

        // Test the connection
        docker.ping().await?;

        info!("Successfully connected to Docker daemon");
        Ok(Self {
            docker,
            config,
            sessions: SessionCounts::default(),
        })
    }

    pub(crate) fn connect_to_docker(configured_host: Option<&str>) -> Result<Docker, bollard::errors::Error> {
        // Try configuration first
        if let Some(docker_host) = configured_host {
            info!("Using Docker host from config: {}", docker_host);
            std::env::set_var("DOCKER_HOST", docker_host);

            match Docker::connect_with_local_defaults() {
                Ok(docker) => return Ok(docker),
                Err(e) => {
                    warn!("Failed to connect to configured Docker host {}: {}", docker_host, e);
                }
            }
        }

        // Try environment variable next
        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            info!("Using DOCKER_HOST: {}", docker_host);
            return Docker::connect_with_local_defaults();
        }

        for socket_path in Self::get_docker_socket_paths() {
            let exists = if socket_path.starts_with("npipe:") {
                // Named pipes can't be checked up front
                true
            } else {
                std::path::Path::new(&socket_path).exists()
            };

            if exists {
                info!("Found Docker socket at: {}", socket_path);

                let docker_host = if socket_path.starts_with("npipe:") {
                    socket_path.clone()
                } else {
                    format!("unix://{}", socket_path)
                };
                std::env::set_var("DOCKER_HOST", docker_host);

                match Docker::connect_with_local_defaults() {
                    Ok(docker) => return Ok(docker),
                    Err(e) => {
                        warn!("Failed to connect to Docker socket {}: {}", socket_path, e);
                        continue;
                    }
                }
            }
        }

        warn!("No Docker socket found, trying default connection");
        Docker::connect_with_local_defaults()
    }

    fn get_docker_socket_paths() -> Vec<String> {
        let mut paths = Vec::new();

        if cfg!(target_os = "macos") {
            if let Ok(home) = std::env::var("HOME") {
                // Docker Desktop, Colima
                paths.push(format!("{}/.docker/run/docker.sock", home));
                paths.push(format!("{}/.colima/default/docker.sock", home));
            }
        }

        if cfg!(target_os = "linux") {
            paths.push("/var/run/docker.sock".to_string());

            // Rootless Docker, then Podman
            if let Ok(xdg_runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                paths.push(format!("{}/docker.sock", xdg_runtime_dir));
                paths.push(format!("{}/podman/podman.sock", xdg_runtime_dir));
            }
        }

        if cfg!(target_os = "windows") {
            paths.push("npipe:////./pipe/docker_engine".to_string());
        }

        paths
    }

    /// Make sure `container_id` names a running container, creating it if allowed
    async fn ensure_running(&self, container_id: &str) -> Result<(), BackendError> {
        match self.docker.inspect_container(container_id, None).await {
            Ok(info) => {
                let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
                if running {
                    debug!("Container {} already running", container_id);
                    return Ok(());
                }
                info!("Starting stopped container {}", container_id);
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                if !self.config.create_missing {
                    return Err(BackendError::NotFound(container_id.to_string()));
                }
                self.create_session_container(container_id).await?;
            }
            Err(e) => return Err(BackendError::Connection(e)),
        }

        match self
            .docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => info!("Successfully started container {}", container_id),
            // Another session started it first
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => {
                debug!("Container {} was already started", container_id);
            }
            Err(e) => return Err(BackendError::Connection(e)),
        }
        Ok(())
    }

    async fn create_session_container(&self, name: &str) -> Result<(), BackendError> {
        info!("Creating container {} from {}", name, self.config.image);
        self.ensure_image_available(&self.config.image).await?;

        let container_config = Config {
            image: Some(self.config.image.clone()),
            tty: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            labels: Some(HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let response = match self
            .docker
            .create_container(Some(create_options), container_config)
            .await
        {
            Ok(response) => response,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }) => {
                info!("Container {} was created by a concurrent session", name);
                return Ok(());
            }
            Err(e) => return Err(BackendError::Connection(e)),
        };
        for warning in &response.warnings {
            warn!("Docker warning for {}: {}", name, warning);
        }

        info!("Created container {} with ID {}", name, response.id);
        Ok(())
    }

    async fn ensure_image_available(&self, image: &str) -> Result<(), BackendError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters: HashMap::from([("reference".to_string(), vec![image.to_string()])]),
                ..Default::default()
            }))
            .await?;

        if !images.is_empty() {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image {}", image);

        let create_image_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(create_image_options), None, None);

        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                error!("Failed to pull image {}: {}", image, e);
                return Err(BackendError::OperationFailed(format!("Failed to pull image: {}", e)));
            }
        }

        info!("Successfully pulled image {}", image);
        Ok(())
    }
}

/// Terminal bytes carried by an attach chunk; stdin echoes carry none
pub(crate) fn output_bytes(chunk: LogOutput) -> Option<Vec<u8>> {
    match chunk {
        LogOutput::StdOut { message } | LogOutput::StdErr { message } | LogOutput::Console { message } => {
            Some(message.to_vec())
        }
        LogOutput::StdIn { .. } => None,
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn open_session(&self, container_id: &str) -> Result<AttachedTty, BackendError> {
        self.ensure_running(container_id).await?;

        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };

        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(container_id, Some(options))
            .await?;
        let active = self.sessions.acquire(container_id);
        info!("Attached to container {} ({} sessions)", container_id, active);

        let output = output.filter_map(|chunk| async move {
            match chunk {
                Ok(chunk) => output_bytes(chunk).map(Ok),
                Err(e) => Some(Err(BackendError::Connection(e))),
            }
        });

        Ok(AttachedTty {
            output: Box::pin(output),
            input,
        })
    }

    async fn resize(&self, container_id: &str, cols: u16, rows: u16) -> Result<(), BackendError> {
        let options = ResizeContainerTtyOptions {
            width: cols,
            height: rows,
        };
        self.docker.resize_container_tty(container_id, options).await?;
        debug!("Resized container {} TTY to {}x{}", container_id, cols, rows);
        Ok(())
    }

    async fn close_session(&self, container_id: &str) -> Result<(), BackendError> {
        if !self.sessions.release(container_id) {
            debug!(
                "Container {} still has {} sessions",
                container_id,
                self.sessions.active(container_id)
            );
            return Ok(());
        }
        if !self.config.remove_on_disconnect {
            return Ok(());
        }

        let info = match self.docker.inspect_container(container_id, None).await {
            Ok(info) => info,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                debug!("Container {} was already removed", container_id);
                return Ok(());
            }
            Err(e) => return Err(BackendError::Connection(e)),
        };

        let managed = info
            .config
            .and_then(|config| config.labels)
            .is_some_and(|labels| labels.contains_key(MANAGED_LABEL));
        if !managed {
            debug!("Leaving unmanaged container {} in place", container_id);
            return Ok(());
        }

        let remove_options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(container_id, Some(remove_options)).await {
            Ok(()) => {
                info!("Removed container {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(BackendError::Connection(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_output_bytes_keeps_tty_streams() {
        assert_eq!(
            output_bytes(LogOutput::StdOut { message: b"out".to_vec().into() }),
            Some(b"out".to_vec())
        );
        assert_eq!(
            output_bytes(LogOutput::StdErr { message: b"err".to_vec().into() }),
            Some(b"err".to_vec())
        );
        assert_eq!(
            output_bytes(LogOutput::Console { message: b"\x1b[2J".to_vec().into() }),
            Some(b"\x1b[2J".to_vec())
        );
        assert_eq!(output_bytes(LogOutput::StdIn { message: b"ls".to_vec().into() }), None);
    }

    #[test]
    fn test_session_counts_release_last_only() {
        let sessions = SessionCounts::default();
        assert_eq!(sessions.acquire("box"), 1);
        assert_eq!(sessions.acquire("box"), 2);
        assert_eq!(sessions.acquire("other"), 1);

        // First of two sockets leaving must not clean up the container
        assert!(!sessions.release("box"));
        assert_eq!(sessions.active("box"), 1);
        assert!(sessions.release("box"));
        assert_eq!(sessions.active("box"), 0);

        assert_eq!(sessions.active("other"), 1);
        assert!(sessions.release("other"));
    }

    #[test]
    fn test_session_counts_release_unknown_id() {
        let sessions = SessionCounts::default();
        assert!(sessions.release("never-opened"));
        assert_eq!(sessions.acquire("never-opened"), 1);
    }

    // Note: these require Docker to be running; run with `cargo test -- --ignored`

    #[tokio::test]
    #[ignore]
    async fn test_docker_backend_creation() {
        let backend = DockerBackend::new(ServerConfig::default()).await;
        assert!(backend.is_ok(), "Should be able to connect to Docker");
    }

    #[tokio::test]
    #[ignore]
    async fn test_second_session_keeps_container() {
        let config = ServerConfig {
            remove_on_disconnect: true,
            ..Default::default()
        };
        let backend = DockerBackend::new(config).await.unwrap();
        let name = format!("webterm-test-{}", uuid::Uuid::new_v4());

        let (first, second) = tokio::join!(backend.open_session(&name), backend.open_session(&name));
        let _first = first.unwrap();
        let _second = second.unwrap();

        backend.close_session(&name).await.unwrap();
        assert!(backend.docker.inspect_container(&name, None).await.is_ok());

        backend.close_session(&name).await.unwrap();
        assert!(backend.docker.inspect_container(&name, None).await.is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_session_lifecycle() {
        let config = ServerConfig {
            remove_on_disconnect: true,
            ..Default::default()
        };
        let backend = DockerBackend::new(config).await.unwrap();
        let name = format!("webterm-test-{}", uuid::Uuid::new_v4());

        let mut tty = backend.open_session(&name).await.unwrap();
        backend.resize(&name, 100, 30).await.unwrap();

        tty.input.write_all(b"echo webterm-ok\n").await.unwrap();
        let mut seen = Vec::new();
        while let Some(chunk) = tty.output.next().await {
            seen.extend(chunk.unwrap());
            if String::from_utf8_lossy(&seen).contains("webterm-ok\r\n") {
                break;
            }
        }

        backend.close_session(&name).await.unwrap();
        assert!(matches!(
            backend.docker.inspect_container(&name, None).await,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. })
        ));
    }
}
