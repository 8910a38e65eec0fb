//! Container records and creation specs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A published port of a listed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host interface, `0.0.0.0` or `::` for all interfaces.
    #[serde(rename = "IP", default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(rename = "PrivatePort")]
    pub private_port: u16,

    /// Absent when the port is exposed but not published.
    #[serde(rename = "PublicPort", default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,

    #[serde(rename = "Type", default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl PortBinding {
    /// Host address this binding is reachable at, if bound to a specific one.
    pub fn specific_ip(&self) -> Option<&str> {
        match self.ip.as_deref() {
            None | Some("") | Some("0.0.0.0") | Some("::") => None,
            Some(ip) => Some(ip),
        }
    }
}

/// A container as returned by the list call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,

    #[serde(default)]
    pub names: Vec<String>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// `running`, `exited`, `created`...
    #[serde(default)]
    pub state: String,

    /// Human-readable status, e.g. `Up 2 hours`.
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub ports: Vec<PortBinding>,
}

impl ContainerSummary {
    /// First 7 characters of the ID.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Primary name without the leading slash.
    pub fn name(&self) -> Option<&str> {
        self.names.first().map(|n| n.trim_start_matches('/'))
    }

    /// Bindings that are actually published on the host.
    pub fn published(&self) -> impl Iterator<Item = (&PortBinding, u16)> {
        self.ports
            .iter()
            .filter_map(|p| p.public_port.map(|public| (p, public)))
    }

    /// First published host port.
    pub fn public_port(&self) -> Option<u16> {
        self.published().map(|(_, port)| port).next()
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Selection for the list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    /// Include stopped containers.
    pub all: bool,
    pub labels: Vec<String>,
    pub status: Option<String>,
    pub name: Option<String>,
}

impl ContainerFilter {
    /// Running containers carrying `label`.
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            labels: vec![label.into()],
            ..Default::default()
        }
    }

    /// Include stopped containers.
    pub fn all(mut self) -> Self {
        self.all = true;
        self
    }

    /// Restrict to one status (implies `all`).
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.all = true;
        self.status = Some(status.into());
        self
    }

    /// Containers whose name matches.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            all: true,
            ..Default::default()
        }
    }

    /// Whether `container` passes this filter.
    ///
    /// Mirrors the runtime's own semantics so in-process runtimes filter the
    /// same way.
    pub fn matches(&self, container: &ContainerSummary) -> bool {
        if !self.all && !container.is_running() {
            return false;
        }
        if !self.labels.iter().all(|l| container.labels.contains_key(l)) {
            return false;
        }
        if let Some(status) = &self.status {
            if &container.state != status {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !container.names.iter().any(|n| n.trim_start_matches('/').contains(name.as_str())) {
                return false;
            }
        }
        true
    }

    /// JSON `filters` parameter for the list call.
    pub fn filters_json(&self) -> serde_json::Value {
        let mut filters = serde_json::Map::new();
        if !self.labels.is_empty() {
            filters.insert("label".to_string(), serde_json::json!(self.labels));
        }
        if let Some(status) = &self.status {
            filters.insert("status".to_string(), serde_json::json!([status]));
        }
        if let Some(name) = &self.name {
            filters.insert("name".to_string(), serde_json::json!([name]));
        }
        serde_json::Value::Object(filters)
    }
}

/// Restart policy for created containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
        }
    }
}

/// Host port published to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedPort {
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PublishedPort>,
    pub restart_policy: RestartPolicy,
    /// `container:alias` entries.
    pub links: Vec<String>,
    /// `host:container` bind mounts.
    pub binds: Vec<String>,
    pub tty: bool,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a label with an empty value.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into(), String::new());
        self
    }

    pub fn cmd<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn publish(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PublishedPort {
            host_port,
            container_port,
        });
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn link(mut self, container: &str, alias: &str) -> Self {
        self.links.push(format!("{container}:{alias}"));
        self
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Body of the Docker Engine create call.
    pub fn create_body(&self) -> serde_json::Value {
        let mut exposed = serde_json::Map::new();
        let mut bindings = serde_json::Map::new();
        for port in &self.ports {
            let key = format!("{}/tcp", port.container_port);
            exposed.insert(key.clone(), serde_json::json!({}));
            bindings.insert(
                key,
                serde_json::json!([{ "HostPort": port.host_port.to_string() }]),
            );
        }

        let mut body = serde_json::json!({
            "Image": self.image,
            "Env": self.env,
            "Labels": self.labels,
            "ExposedPorts": exposed,
            "Tty": self.tty,
            "HostConfig": {
                "PortBindings": bindings,
                "RestartPolicy": { "Name": self.restart_policy.as_str() },
                "Links": self.links,
                "Binds": self.binds,
            },
        });
        if !self.cmd.is_empty() {
            body["Cmd"] = serde_json::json!(self.cmd);
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed() -> ContainerSummary {
        serde_json::from_value(serde_json::json!({
            "Id": "4fa6e0f0c6786287e131c3852c58a2e01cc697a68231826813597e4994f1d6e2",
            "Names": ["/nbviewer-8080"],
            "Image": "nbviewer",
            "Labels": {"nbviewer": ""},
            "State": "running",
            "Status": "Up 2 hours",
            "Ports": [
                {"IP": "0.0.0.0", "PrivatePort": 8080, "PublicPort": 8080, "Type": "tcp"},
                {"IP": "::", "PrivatePort": 8080, "PublicPort": 8080, "Type": "tcp"},
                {"PrivatePort": 9000, "Type": "tcp"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_summary_decoding() {
        let c = listed();
        assert_eq!(c.short_id(), "4fa6e0f");
        assert_eq!(c.name(), Some("nbviewer-8080"));
        assert_eq!(c.public_port(), Some(8080));
        assert_eq!(c.published().count(), 2);
        assert!(c.ports[0].specific_ip().is_none());
    }

    #[test]
    fn test_filter_matches_like_runtime() {
        let mut c = listed();
        assert!(ContainerFilter::label("nbviewer").matches(&c));
        assert!(!ContainerFilter::label("nbcache").matches(&c));
        assert!(ContainerFilter::named("nbviewer").matches(&c));

        c.state = "exited".to_string();
        assert!(!ContainerFilter::label("nbviewer").matches(&c));
        assert!(ContainerFilter::label("nbviewer").all().matches(&c));
        assert!(ContainerFilter::label("nbviewer").status("exited").matches(&c));
    }

    #[test]
    fn test_filters_json() {
        let filter = ContainerFilter::label("nbviewer").status("exited");
        assert_eq!(
            filter.filters_json(),
            serde_json::json!({"label": ["nbviewer"], "status": ["exited"]})
        );
    }

    #[test]
    fn test_create_body() {
        let spec = ContainerSpec::new("nbviewer")
            .name("nbviewer-8081")
            .label("nbviewer")
            .publish(8081, 8080)
            .restart(RestartPolicy::Always)
            .link("abc123", "nbcache")
            .cmd(["python", "-m", "nbviewer"]);
        let body = spec.create_body();

        assert_eq!(body["Image"], "nbviewer");
        assert_eq!(body["Labels"]["nbviewer"], "");
        assert_eq!(body["ExposedPorts"]["8080/tcp"], serde_json::json!({}));
        assert_eq!(
            body["HostConfig"]["PortBindings"]["8080/tcp"][0]["HostPort"],
            "8081"
        );
        assert_eq!(body["HostConfig"]["RestartPolicy"]["Name"], "always");
        assert_eq!(body["HostConfig"]["Links"][0], "abc123:nbcache");
        assert_eq!(body["Cmd"][2], "nbviewer");
    }
}
