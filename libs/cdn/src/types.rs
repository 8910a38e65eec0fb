//! Edge configuration records.

use serde::{Deserialize, Serialize};

use crate::error::CdnError;

/// Policy fields shared by every backend of the service.
///
/// New backends copy these verbatim from a template backend, so a fleet
/// keeps one health check and one set of limits no matter how often it
/// is rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conn: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_threshold: Option<u32>,

    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u32>,

    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between_bytes_timeout: Option<u32>,

    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_byte_timeout: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_loadbalance: Option<bool>,
}

impl BackendPolicy {
    /// Form fields for the policy, in a stable order.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(v) = &self.healthcheck {
            fields.push(("healthcheck", v.clone()));
        }
        if let Some(v) = self.max_conn {
            fields.push(("max_conn", v.to_string()));
        }
        if let Some(v) = self.weight {
            fields.push(("weight", v.to_string()));
        }
        if let Some(v) = self.error_threshold {
            fields.push(("error_threshold", v.to_string()));
        }
        if let Some(v) = self.connect_timeout {
            fields.push(("connect_timeout", v.to_string()));
        }
        if let Some(v) = self.between_bytes_timeout {
            fields.push(("between_bytes_timeout", v.to_string()));
        }
        if let Some(v) = self.first_byte_timeout {
            fields.push(("first_byte_timeout", v.to_string()));
        }
        if let Some(v) = self.auto_loadbalance {
            fields.push(("auto_loadbalance", v.to_string()));
        }
        fields
    }
}

/// A backend (origin server) in one configuration version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backend {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(flatten)]
    pub policy: BackendPolicy,
}

/// Backend as returned by the API.
///
/// Older backends only carry `ipv4` or `hostname`; `address` is preferred
/// when present.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BackendRecord {
    name: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    ipv4: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    port: u16,
    #[serde(flatten)]
    policy: BackendPolicy,
}

impl TryFrom<BackendRecord> for Backend {
    type Error = CdnError;

    fn try_from(record: BackendRecord) -> Result<Self, Self::Error> {
        let address = [record.address, record.ipv4, record.hostname]
            .into_iter()
            .flatten()
            .find(|a| !a.is_empty())
            .ok_or_else(|| {
                CdnError::Decode(format!("backend '{}' has no address", record.name))
            })?;

        Ok(Self {
            name: record.name,
            address,
            port: record.port,
            policy: record.policy,
        })
    }
}

/// Request body for creating a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBackend {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub policy: BackendPolicy,
}

impl NewBackend {
    /// Build a backend that copies its policy from `template`.
    pub fn from_template(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        template: &BackendPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            policy: template.clone(),
        }
    }

    /// Form-encoded fields for the create call.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = self.policy.form_fields();
        fields.push(("address", self.address.clone()));
        fields.push(("name", self.name.clone()));
        fields.push(("port", self.port.to_string()));
        fields
    }

    /// The backend this request produces.
    pub fn into_backend(self) -> Backend {
        Backend {
            name: self.name,
            address: self.address,
            port: self.port,
            policy: self.policy,
        }
    }
}

/// A numbered snapshot of the edge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub number: u32,

    #[serde(default)]
    pub active: bool,

    /// Versions that have ever been active are locked and cannot be edited.
    #[serde(default)]
    pub locked: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ConfigVersion {
    /// Whether backends can be added to or removed from this version.
    pub fn is_editable(&self) -> bool {
        !self.active && !self.locked
    }
}

/// The highest-numbered version, if any.
pub fn latest_version(versions: &[ConfigVersion]) -> Option<&ConfigVersion> {
    versions.iter().max_by_key(|v| v.number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_prefers_address_then_ipv4() {
        let record: BackendRecord = serde_json::from_value(serde_json::json!({
            "name": "nbviewer-1-8080",
            "address": "",
            "ipv4": "10.0.0.1",
            "hostname": "viewer.example.org",
            "port": 8080,
            "max_conn": 200
        }))
        .unwrap();

        let backend = Backend::try_from(record).unwrap();
        assert_eq!(backend.address, "10.0.0.1");
        assert_eq!(backend.port, 8080);
        assert_eq!(backend.policy.max_conn, Some(200));
    }

    #[test]
    fn record_without_address_is_rejected() {
        let record: BackendRecord = serde_json::from_value(serde_json::json!({
            "name": "orphan",
            "port": 80
        }))
        .unwrap();

        assert!(matches!(Backend::try_from(record), Err(CdnError::Decode(_))));
    }

    #[test]
    fn new_backend_form_copies_template_policy() {
        let template = BackendPolicy {
            healthcheck: Some("nbviewer-health".to_string()),
            weight: Some(100),
            auto_loadbalance: Some(true),
            ..Default::default()
        };
        let form = NewBackend::from_template("host-8081", "10.0.0.2", 8081, &template).form_fields();

        assert!(form.contains(&("healthcheck", "nbviewer-health".to_string())));
        assert!(form.contains(&("weight", "100".to_string())));
        assert!(form.contains(&("auto_loadbalance", "true".to_string())));
        assert!(form.contains(&("port", "8081".to_string())));
        assert!(!form.iter().any(|(k, _)| *k == "max_conn"));
    }

    #[test]
    fn latest_version_is_highest_number() {
        let versions = vec![
            ConfigVersion { number: 3, active: false, locked: false, comment: None },
            ConfigVersion { number: 7, active: true, locked: true, comment: None },
            ConfigVersion { number: 5, active: false, locked: true, comment: None },
        ];
        let latest = latest_version(&versions).unwrap();
        assert_eq!(latest.number, 7);
        assert!(!latest.is_editable());
    }
}
