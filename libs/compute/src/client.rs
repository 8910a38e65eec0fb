//! Rackspace (OpenStack compute) client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::ComputeError;
use crate::types::{Image, Keypair, NewServer, Server};

/// Rackspace identity endpoint.
pub const DEFAULT_IDENTITY_URL: &str = "https://identity.api.rackspacecloud.com/v2.0";

/// Catalog entry type for compute endpoints.
const COMPUTE_SERVICE_TYPE: &str = "compute";

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Server lifecycle operations against a compute provider.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Servers whose name contains `name`.
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>, ComputeError>;

    async fn list_images(&self) -> Result<Vec<Image>, ComputeError>;

    async fn create_server(&self, request: &NewServer) -> Result<Server, ComputeError>;

    async fn list_keypairs(&self) -> Result<Vec<Keypair>, ComputeError>;

    async fn create_keypair(&self, name: &str, public_key: &str) -> Result<Keypair, ComputeError>;
}

/// Authenticated compute client for one region.
#[derive(Debug, Clone)]
pub struct RackspaceClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct Token {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    #[serde(default)]
    region: Option<String>,
    #[serde(rename = "publicURL")]
    public_url: String,
}

impl RackspaceClient {
    /// Authenticate with an API key and bind to `region`'s compute endpoint.
    pub async fn connect(
        identity_url: &str,
        username: &str,
        api_key: &str,
        region: &str,
    ) -> Result<Self, ComputeError> {
        if region.is_empty() {
            return Err(ComputeError::Config("region is required".to_string()));
        }

        let url = format!("{}/tokens", identity_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": username,
                    "apiKey": api_key,
                }
            }
        });

        debug!(url = %url, username = username, "Authenticating with compute identity service");
        let response = reqwest::Client::new().post(&url).json(&body).send().await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ComputeError::Auth(format!("identity service returned {status}")));
        }
        let tokens: TokenResponse = decode(check(response).await?).await?;

        let endpoint = tokens
            .access
            .service_catalog
            .iter()
            .filter(|entry| entry.kind == COMPUTE_SERVICE_TYPE)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|e| e.region.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(region)))
            .map(|e| e.public_url.clone())
            .ok_or_else(|| {
                ComputeError::Auth(format!("no compute endpoint for region '{region}'"))
            })?;

        info!(region = region, endpoint = %endpoint, "Authenticated with compute provider");
        Self::with_token(&endpoint, &tokens.access.token.id)
    }

    /// Client for a known endpoint and token.
    pub fn with_token(endpoint: &str, token: &str) -> Result<Self, ComputeError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut token = HeaderValue::from_str(token)
            .map_err(|_| ComputeError::Config("token is not a valid header value".to_string()))?;
        token.set_sensitive(true);
        headers.insert(AUTH_TOKEN_HEADER, token);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ComputeError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn get<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ComputeError> {
        decode(check(request.send().await?).await?).await
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ComputeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, "Compute API error");
    Err(ComputeError::Api {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ComputeError> {
    Ok(response.json().await?)
}

#[async_trait]
impl ComputeProvider for RackspaceClient {
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>, ComputeError> {
        #[derive(Deserialize)]
        struct Servers {
            servers: Vec<Server>,
        }

        let request = self
            .client
            .get(self.url("/servers/detail"))
            .query(&[("name", name)]);
        let servers: Servers = self.get(request).await?;
        Ok(servers.servers)
    }

    async fn list_images(&self) -> Result<Vec<Image>, ComputeError> {
        #[derive(Deserialize)]
        struct Images {
            images: Vec<Image>,
        }

        let images: Images = self.get(self.client.get(self.url("/images/detail"))).await?;
        Ok(images.images)
    }

    async fn create_server(&self, request: &NewServer) -> Result<Server, ComputeError> {
        #[derive(Deserialize)]
        struct Created {
            server: CreatedServer,
        }
        #[derive(Deserialize)]
        struct CreatedServer {
            id: String,
        }

        info!(name = %request.name, image = %request.image_id, flavor = %request.flavor_id, "Creating server");
        let body = serde_json::json!({ "server": request });
        let created: Created = self
            .get(self.client.post(self.url("/servers")).json(&body))
            .await?;

        Ok(Server {
            id: created.server.id,
            name: request.name.clone(),
            status: "BUILD".to_string(),
            access_ipv4: None,
            addresses: Default::default(),
            created: None,
        })
    }

    async fn list_keypairs(&self) -> Result<Vec<Keypair>, ComputeError> {
        #[derive(Deserialize)]
        struct Keypairs {
            keypairs: Vec<Wrapped>,
        }
        #[derive(Deserialize)]
        struct Wrapped {
            keypair: Keypair,
        }

        let keypairs: Keypairs = self.get(self.client.get(self.url("/os-keypairs"))).await?;
        Ok(keypairs.keypairs.into_iter().map(|k| k.keypair).collect())
    }

    async fn create_keypair(&self, name: &str, public_key: &str) -> Result<Keypair, ComputeError> {
        #[derive(Deserialize)]
        struct Wrapped {
            keypair: Keypair,
        }

        info!(name = name, "Registering SSH keypair");
        let body = serde_json::json!({
            "keypair": { "name": name, "public_key": public_key }
        });
        let created: Wrapped = self
            .get(self.client.post(self.url("/os-keypairs")).json(&body))
            .await?;
        Ok(created.keypair)
    }
}
