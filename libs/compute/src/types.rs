//! Compute resources.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One address of a server on a named network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub addr: String,
    #[serde(default = "default_ip_version")]
    pub version: u8,
}

fn default_ip_version() -> u8 {
    4
}

/// A compute server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub status: String,

    #[serde(rename = "accessIPv4", default)]
    pub access_ipv4: Option<String>,

    /// Addresses keyed by network name (`public`, `private`).
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<ServerAddress>>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl Server {
    /// Public IPv4 address, preferring `accessIPv4`.
    pub fn public_ipv4(&self) -> Option<&str> {
        if let Some(ip) = self.access_ipv4.as_deref().filter(|ip| !ip.is_empty()) {
            return Some(ip);
        }
        self.addresses
            .get("public")?
            .iter()
            .find(|a| a.version == 4)
            .map(|a| a.addr.as_str())
    }
}

/// A bootable image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
}

/// Request for a new server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewServer {
    pub name: String,

    #[serde(rename = "imageRef")]
    pub image_id: String,

    #[serde(rename = "flavorRef")]
    pub flavor_id: String,

    /// SSH keypair injected into the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

/// An SSH keypair registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub name: String,

    #[serde(default)]
    pub public_key: String,

    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_ipv4_prefers_access_ip() {
        let server: Server = serde_json::from_value(serde_json::json!({
            "id": "srv-1",
            "name": "nbviewer-1",
            "status": "ACTIVE",
            "accessIPv4": "",
            "addresses": {
                "public": [
                    {"addr": "2001:db8::1", "version": 6},
                    {"addr": "198.51.100.7", "version": 4}
                ],
                "private": [{"addr": "10.176.0.2", "version": 4}]
            },
            "created": "2016-05-09T20:31:29Z"
        }))
        .unwrap();
        assert_eq!(server.public_ipv4(), Some("198.51.100.7"));
        assert!(server.created.is_some());

        let server = Server {
            access_ipv4: Some("203.0.113.9".to_string()),
            ..server
        };
        assert_eq!(server.public_ipv4(), Some("203.0.113.9"));
    }

    #[test]
    fn test_new_server_body() {
        let body = serde_json::to_value(NewServer {
            name: "nbviewer-3".to_string(),
            image_id: "img".to_string(),
            flavor_id: "general1-2".to_string(),
            key_name: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"name": "nbviewer-3", "imageRef": "img", "flavorRef": "general1-2"})
        );
    }
}
