//! Deployment settings.
//!
//! Settings come from an optional TOML file; every field has a default that
//! matches the production nbviewer deployment, so an empty file (or none at
//! all) is a valid configuration for a single Docker host.
//!
//! File lookup order:
//! - `--config <path>` / `NBDEPLOY_CONFIG` (must exist)
//! - `nbdeploy.toml` in the working directory
//! - `config.toml` in the user config directory

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use nbdeploy_cdn::{BackendPolicy, DEFAULT_API_URL};
use nbdeploy_compute::DEFAULT_IDENTITY_URL;
use serde::{Deserialize, Serialize};

/// Settings file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "nbdeploy.toml";

/// Settings file looked up in the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "jupyter", "nbdeploy")
        .map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
}

/// All deployment settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub service: ServiceSettings,
    pub sidecar: SidecarSettings,
    pub logging: LogForwarderSettings,
    pub statuspage: StatuspageSettings,
    pub liveness: LivenessSettings,
    pub cdn: CdnSettings,
    pub compute: ComputeSettings,
    pub fleet: FleetSettings,
    pub images: ImageSettings,
    pub registry: RegistrySettings,
    pub bump: BumpSettings,
    pub smoke: SmokeSettings,
}

impl Settings {
    /// Load settings, honoring an explicit path first.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::resolve_path(explicit, Path::new(LOCAL_CONFIG_FILE), user_config_path()) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Pick the settings file to read, if any.
    ///
    /// An explicit path is returned even when missing so that reading it
    /// reports the error.
    pub fn resolve_path(
        explicit: Option<&Path>,
        local: &Path,
        user: Option<PathBuf>,
    ) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if local.exists() {
            return Some(local.to_path_buf());
        }
        user.filter(|path| path.exists())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// The viewer service containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSettings {
    /// Image the instances run.
    pub image: String,

    /// Container name prefix; instances are named `<prefix>-<port>`.
    pub name_prefix: String,

    /// Label identifying service containers.
    pub label: String,

    /// First host port tried when allocating.
    pub base_port: u16,

    /// Port the service listens on inside the container.
    pub container_port: u16,

    /// `KEY=VALUE` file with the service environment.
    pub env_file: PathBuf,

    /// Build context for `build`.
    pub build_context: PathBuf,

    /// Tag for locally built images.
    pub build_tag: String,

    pub command: Vec<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            image: "nbviewer".to_string(),
            name_prefix: "nbviewer".to_string(),
            label: "nbviewer".to_string(),
            base_port: 8080,
            container_port: 8080,
            env_file: PathBuf::from("env_file"),
            build_context: PathBuf::from("."),
            build_tag: "nbviewer".to_string(),
            command: [
                "newrelic-admin",
                "run-python",
                "-m",
                "nbviewer",
                "--logging=info",
                "--port=8080",
                "--cache_expiry_min=3600",
                "--cache_expiry_max=14400",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// The cache sidecar linked into every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SidecarSettings {
    pub name: String,
    pub image: String,
    pub label: String,
    /// Hostname the service resolves the sidecar under.
    pub alias: String,
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            name: "nbcache".to_string(),
            image: "jupyter/nbcache".to_string(),
            label: "nbcache".to_string(),
            alias: "nbcache".to_string(),
        }
    }
}

/// The log-forwarding container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogForwarderSettings {
    pub name: String,
    pub image: String,
    pub label: String,
    /// Docker socket mounted into the forwarder.
    pub docker_socket: String,
    /// Host name reported with every log line; defaults to the fleet host name.
    pub host_name: Option<String>,
}

impl Default for LogForwarderSettings {
    fn default() -> Self {
        Self {
            name: "logentries".to_string(),
            image: "logentries/docker-logentries".to_string(),
            label: "logentries".to_string(),
            docker_socket: "/var/run/docker.sock".to_string(),
            host_name: None,
        }
    }
}

/// The status page container (one per deployment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatuspageSettings {
    pub name: String,
    pub tag: String,
    pub build_context: PathBuf,
    /// Env files, applied in order.
    pub env_files: Vec<PathBuf>,
}

impl Default for StatuspageSettings {
    fn default() -> Self {
        Self {
            name: "nbviewer-statuspage".to_string(),
            tag: "nbviewer-statuspage".to_string(),
            build_context: PathBuf::from("statuspage"),
            env_files: vec![PathBuf::from("env_file"), PathBuf::from("env_statuspage")],
        }
    }
}

/// Post-launch liveness polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LivenessSettings {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_ms: 1000,
        }
    }
}

/// Post-deploy smoke check of the public site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmokeSettings {
    pub base_url: String,

    /// The front page must link more thumbnails than this.
    pub min_thumbnails: usize,

    pub timeout_secs: u64,
}

impl Default for SmokeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://nbviewer.org".to_string(),
            min_thumbnails: 5,
            timeout_secs: 60,
        }
    }
}

/// CDN API access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CdnSettings {
    pub api_url: String,

    /// Policy for new backends when the pool is empty.
    pub default_template: Option<BackendPolicy>,
}

impl Default for CdnSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            default_template: None,
        }
    }
}

/// Compute provider access and new-server parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeSettings {
    pub identity_url: String,
    pub region: String,
    /// Fleet servers are named `<prefix>-<n>`.
    pub server_prefix: String,
    pub flavor: String,
    /// A server image must contain every fragment in its name.
    pub image_fragments: Vec<String>,
    pub keypair_name: Option<String>,
    pub public_key_path: Option<PathBuf>,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            region: "DFW".to_string(),
            server_prefix: "nbviewer".to_string(),
            flavor: "general1-2".to_string(),
            image_fragments: vec!["Ubuntu 16.04".to_string(), "PVHVM".to_string()],
            keypair_name: None,
            public_key_path: None,
        }
    }
}

/// How the fleet's hosts are found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetMode {
    /// The local container runtime is the whole fleet.
    #[default]
    Single,
    /// Every compute server named `<prefix>-<n>` is a host.
    Clustered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetSettings {
    pub mode: FleetMode,
    /// Address the CDN reaches the local host at (single mode).
    pub advertise_host: Option<String>,
    /// Identity prefix of the local host; defaults to the advertise host.
    pub host_name: Option<String>,
    /// Docker API port on clustered hosts.
    pub docker_port: u16,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            mode: FleetMode::Single,
            advertise_host: None,
            host_name: None,
            docker_port: 2375,
        }
    }
}

/// Images refreshed by `pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSettings {
    pub pull: Vec<String>,
    /// Namespace for bare image names.
    pub namespace: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            pull: vec!["jupyter/nbviewer".to_string(), "jupyter/nbcache".to_string()],
            namespace: "jupyter".to_string(),
        }
    }
}

impl ImageSettings {
    /// Qualify a bare image name with the namespace.
    pub fn qualify(&self, image: &str) -> String {
        if image.contains('/') {
            image.to_string()
        } else {
            format!("{}/{}", self.namespace, image)
        }
    }
}

/// Image registry endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// Build trigger URL; `{token}` is replaced by the trigger token.
    pub trigger_url: String,
    /// Tags listing of the published service image.
    pub tags_url: String,
    /// Repository the tags belong to.
    pub repository: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            trigger_url: "https://registry.hub.docker.com/u/jupyter/nbviewer/trigger/{token}/"
                .to_string(),
            tags_url: "https://hub.docker.com/v2/repositories/jupyter/nbviewer/tags".to_string(),
            repository: "jupyter/nbviewer".to_string(),
        }
    }
}

/// Files rewritten by `bump`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BumpSettings {
    pub deployment_file: PathBuf,
    pub workflow_file: PathBuf,
    pub chart_repository: String,
}

impl Default for BumpSettings {
    fn default() -> Self {
        Self {
            deployment_file: PathBuf::from("config/nbviewer.yaml"),
            workflow_file: PathBuf::from(".github/workflows/cd.yml"),
            chart_repository: "https://github.com/jupyter/nbviewer".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.service.base_port, 8080);
        assert_eq!(settings.liveness.max_attempts, 30);
        assert_eq!(settings.fleet.mode, FleetMode::Single);
        assert_eq!(settings.service.command[3], "nbviewer");
        assert_eq!(settings.smoke.min_thumbnails, 5);
    }

    #[test]
    fn test_partial_sections() {
        let settings = Settings::from_toml(
            r#"
            [fleet]
            mode = "clustered"
            docker_port = 2376

            [liveness]
            interval_ms = 250

            [cdn.default_template]
            healthcheck = "nbviewer-health"
            weight = 100
            "#,
        )
        .unwrap();

        assert_eq!(settings.fleet.mode, FleetMode::Clustered);
        assert_eq!(settings.fleet.docker_port, 2376);
        assert_eq!(settings.liveness.max_attempts, 30);
        assert_eq!(settings.liveness.interval_ms, 250);
        let template = settings.cdn.default_template.unwrap();
        assert_eq!(template.healthcheck.as_deref(), Some("nbviewer-health"));
        assert_eq!(template.weight, Some(100));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Settings::from_toml("[service]\nbase_prot = 9000\n").is_err());
    }

    #[test]
    fn test_qualify_image() {
        let images = ImageSettings::default();
        assert_eq!(images.qualify("nbviewer"), "jupyter/nbviewer");
        assert_eq!(images.qualify("logentries/docker-logentries"), "logentries/docker-logentries");
    }

    #[test]
    fn test_resolve_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join(LOCAL_CONFIG_FILE);
        let user = dir.path().join("user.toml");

        assert_eq!(Settings::resolve_path(None, &local, Some(user.clone())), None);

        fs::write(&user, "").unwrap();
        assert_eq!(
            Settings::resolve_path(None, &local, Some(user.clone())),
            Some(user.clone())
        );

        fs::write(&local, "").unwrap();
        assert_eq!(
            Settings::resolve_path(None, &local, Some(user.clone())),
            Some(local.clone())
        );

        let explicit = dir.path().join("missing.toml");
        assert_eq!(
            Settings::resolve_path(Some(&explicit), &local, Some(user)),
            Some(explicit.clone())
        );
        assert!(Settings::from_file(&explicit).is_err());
    }
}
