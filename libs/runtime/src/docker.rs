//! Docker Engine API client.
//!
//! Talks plain HTTP to the engine, either over its Unix socket (the local
//! host) or over TCP (remote fleet hosts). TLS-protected engine endpoints
//! are not supported; remote hosts are expected to expose the API on a
//! private interface.
//!
//! Reference: https://docs.docker.com/engine/api/v1.41/

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerFilter, ContainerSpec, ContainerSummary};

/// Engine socket used when `DOCKER_HOST` is unset.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Engine API version all paths are pinned to.
pub const API_VERSION: &str = "v1.41";

enum Transport {
    Unix {
        socket: PathBuf,
        client: Client<UnixConnector>,
    },
    Tcp {
        authority: String,
        client: Client<HttpConnector>,
    },
}

/// Docker Engine API client.
pub struct DockerClient {
    transport: Transport,
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

impl DockerClient {
    /// Client for the engine listening on a Unix socket.
    pub fn unix<P: AsRef<Path>>(socket: P) -> Self {
        Self {
            transport: Transport::Unix {
                socket: socket.as_ref().to_path_buf(),
                client: Client::unix(),
            },
        }
    }

    /// Client for an engine reachable at `host:port`.
    pub fn tcp(host: &str, port: u16) -> Self {
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        Self {
            transport: Transport::Tcp {
                authority,
                client: Client::new(),
            },
        }
    }

    /// Client for a `DOCKER_HOST`-style endpoint (`unix://` or `tcp://`).
    pub fn from_host(docker_host: &str) -> Result<Self, RuntimeError> {
        if let Some(socket) = docker_host.strip_prefix("unix://") {
            return Ok(Self::unix(socket));
        }

        let rest = docker_host
            .strip_prefix("tcp://")
            .or_else(|| docker_host.strip_prefix("http://"))
            .ok_or_else(|| RuntimeError::Endpoint(docker_host.to_string()))?;
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| RuntimeError::Endpoint(format!("{docker_host}: missing port")))?;
        let port = port
            .parse()
            .map_err(|_| RuntimeError::Endpoint(format!("{docker_host}: invalid port")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::tcp(host, port))
    }

    /// Client for `DOCKER_HOST`, or the default socket.
    pub fn from_env() -> Result<Self, RuntimeError> {
        match std::env::var("DOCKER_HOST") {
            Ok(host) if !host.is_empty() => Self::from_host(&host),
            _ => Ok(Self::unix(DEFAULT_SOCKET)),
        }
    }

    /// Human-readable endpoint.
    pub fn endpoint(&self) -> String {
        match &self.transport {
            Transport::Unix { socket, .. } => format!("unix://{}", socket.display()),
            Transport::Tcp { authority, .. } => format!("tcp://{authority}"),
        }
    }

    fn uri(&self, path: &str) -> Result<hyper::Uri, RuntimeError> {
        let path = format!("/{API_VERSION}{path}");
        match &self.transport {
            Transport::Unix { socket, .. } => Ok(hyperlocal::Uri::new(socket, &path).into()),
            Transport::Tcp { authority, .. } => format!("http://{authority}{path}")
                .parse()
                .map_err(|e: hyper::http::uri::InvalidUri| RuntimeError::Endpoint(e.to_string())),
        }
    }

    /// Perform a request and collect the whole body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
    ) -> Result<(StatusCode, Bytes), RuntimeError> {
        debug!(method = %method, path = path, "Docker API request");

        let mut builder = Request::builder()
            .method(method)
            .uri(self.uri(path)?)
            .header("Accept", "application/json");
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        let request = builder.body(body)?;

        let response = match &self.transport {
            Transport::Unix { client, .. } => client.request(request).await?,
            Transport::Tcp { client, .. } => client.request(request).await?,
        };
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await?;
        Ok((status, body))
    }

    /// Perform a request, mapping non-2xx statuses to errors.
    ///
    /// 304 (already started / already stopped) counts as success.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
    ) -> Result<Bytes, RuntimeError> {
        let (status, bytes) = self.send(method, path, body, content_type).await?;
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(bytes);
        }

        let message = api_message(&bytes);
        error!(status = %status, message = %message, path = path, "Docker API error");
        Err(RuntimeError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Error text from an engine error body (`{"message": ...}` or raw).
fn api_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string())
}

/// Split `name[:tag]` into name and tag, ignoring registry ports.
pub fn split_image_tag(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}

/// Scan a pull/build progress stream, logging output and surfacing errors.
pub(crate) fn scan_stream(operation: &'static str, body: &[u8]) -> Result<(), RuntimeError> {
    #[derive(Deserialize)]
    struct Progress {
        #[serde(default)]
        stream: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    for message in serde_json::Deserializer::from_slice(body).into_iter::<Progress>() {
        let message = message?;
        if let Some(err) = message.error {
            error!(operation, error = %err, "Runtime stream reported an error");
            return Err(RuntimeError::Stream {
                operation,
                message: err.trim().to_string(),
            });
        }
        if let Some(line) = message.stream {
            let line = line.trim_end();
            if !line.is_empty() {
                info!(operation, "{line}");
            }
        } else if let Some(status) = message.status {
            debug!(operation, status = %status, "Progress");
        }
    }
    Ok(())
}

/// Tar up a build context directory.
fn tar_context(context: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", context)?;
    builder.into_inner()
}

fn query<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filters = filter.filters_json().to_string();
        let all = if filter.all { "1" } else { "0" };
        let path = format!(
            "/containers/json?{}",
            query([("all", all), ("filters", filters.as_str())])
        );

        let body = self.call(Method::GET, &path, Body::empty(), None).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Created {
            id: String,
            #[serde(default)]
            warnings: Option<Vec<String>>,
        }

        let path = match &spec.name {
            Some(name) => format!("/containers/create?{}", query([("name", name.as_str())])),
            None => "/containers/create".to_string(),
        };
        let body = serde_json::to_vec(&spec.create_body())?;

        let response = self
            .call(Method::POST, &path, Body::from(body), Some("application/json"))
            .await?;
        let created: Created = serde_json::from_slice(&response)?;
        for warning in created.warnings.unwrap_or_default() {
            warn!(container = %created.id, warning = %warning, "Runtime warning on create");
        }

        info!(
            container = %created.id,
            name = spec.name.as_deref().unwrap_or("-"),
            image = %spec.image,
            "Created container"
        );
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.call(Method::POST, &format!("/containers/{id}/start"), Body::empty(), None)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.call(Method::POST, &format!("/containers/{id}/stop"), Body::empty(), None)
            .await?;
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.call(Method::POST, &format!("/containers/{id}/restart"), Body::empty(), None)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let force = if force { "true" } else { "false" };
        let path = format!("/containers/{id}?{}", query([("force", force)]));
        self.call(Method::DELETE, &path, Body::empty(), None).await?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (name, tag) = split_image_tag(image);
        info!(image = name, tag = tag, "Pulling image");

        let path = format!(
            "/images/create?{}",
            query([("fromImage", name), ("tag", tag)])
        );
        let body = self.call(Method::POST, &path, Body::empty(), None).await?;
        scan_stream("pull", &body)
    }

    async fn build_image(&self, context: &Path, tag: &str, pull: bool) -> Result<(), RuntimeError> {
        info!(context = %context.display(), tag = tag, pull, "Building image");

        let dir = context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || tar_context(&dir))
            .await
            .map_err(std::io::Error::other)??;

        let mut params = vec![("t", tag)];
        if pull {
            params.push(("pull", "1"));
        }
        let path = format!("/build?{}", query(params));
        let body = self
            .call(Method::POST, &path, Body::from(archive), Some("application/x-tar"))
            .await?;
        scan_stream("build", &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_host() {
        let client = DockerClient::from_host("unix:///run/user/1000/docker.sock").unwrap();
        assert_eq!(client.endpoint(), "unix:///run/user/1000/docker.sock");

        let client = DockerClient::from_host("tcp://10.0.0.5:2375").unwrap();
        assert_eq!(client.endpoint(), "tcp://10.0.0.5:2375");

        let client = DockerClient::from_host("tcp://[fd00::5]:2375").unwrap();
        assert_eq!(client.endpoint(), "tcp://[fd00::5]:2375");

        assert!(DockerClient::from_host("npipe:////./pipe/docker_engine").is_err());
        assert!(DockerClient::from_host("tcp://10.0.0.5").is_err());
    }

    #[test]
    fn test_uri_is_versioned() {
        let client = DockerClient::tcp("10.0.0.5", 2375);
        let uri = client.uri("/containers/json?all=0").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.5:2375/v1.41/containers/json?all=0");
    }

    #[test]
    fn test_query_encodes_filters() {
        let filters = ContainerFilter::label("nbviewer").filters_json().to_string();
        let q = query([("all", "0"), ("filters", filters.as_str())]);
        assert_eq!(q, "all=0&filters=%7B%22label%22%3A%5B%22nbviewer%22%5D%7D");
    }

    #[test]
    fn test_split_image_tag() {
        assert_eq!(split_image_tag("jupyter/nbviewer"), ("jupyter/nbviewer", "latest"));
        assert_eq!(split_image_tag("jupyter/nbviewer:1.2"), ("jupyter/nbviewer", "1.2"));
        assert_eq!(
            split_image_tag("registry:5000/nbviewer"),
            ("registry:5000/nbviewer", "latest")
        );
    }

    #[test]
    fn test_api_message() {
        assert_eq!(api_message(br#"{"message":"No such container: abc"}"#), "No such container: abc");
        assert_eq!(api_message(b"page not found\n"), "page not found");
    }

    #[test]
    fn test_scan_stream() {
        let ok = b"{\"stream\":\"Step 1/3 : FROM python\\n\"}\r\n{\"status\":\"Downloading\"}\r\n";
        assert!(scan_stream("build", ok).is_ok());

        let failed = b"{\"stream\":\"Step 1/3\\n\"}{\"errorDetail\":{\"message\":\"boom\"},\"error\":\"boom\"}";
        match scan_stream("build", failed) {
            Err(RuntimeError::Stream { operation, message }) => {
                assert_eq!(operation, "build");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_tar_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM python:3\n").unwrap();

        let archive = tar_context(dir.path()).unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
    }
}
