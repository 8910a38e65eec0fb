//! Fastly configuration API client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::error::CdnError;
use crate::types::{Backend, BackendRecord, ConfigVersion, NewBackend};

/// Default Fastly API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.fastly.com";

/// Header carrying the API key on every call.
pub const API_KEY_HEADER: &str = "Fastly-Key";

/// Versioned edge configuration API for one service.
#[async_trait]
pub trait CdnApi: Send + Sync {
    /// List every configuration version of the service.
    async fn list_versions(&self) -> Result<Vec<ConfigVersion>, CdnError>;

    /// List the backends of one version.
    async fn list_backends(&self, version: u32) -> Result<Vec<Backend>, CdnError>;

    /// Create a backend in a draft version.
    async fn create_backend(&self, version: u32, backend: &NewBackend) -> Result<(), CdnError>;

    /// Delete a backend from a draft version.
    async fn delete_backend(&self, version: u32, name: &str) -> Result<(), CdnError>;

    /// Make a version the active one.
    async fn activate_version(&self, version: u32) -> Result<ConfigVersion, CdnError>;

    /// Clone a version into a new draft.
    async fn clone_version(&self, version: u32) -> Result<ConfigVersion, CdnError>;
}

/// Fastly API client bound to one service.
#[derive(Debug, Clone)]
pub struct FastlyClient {
    client: reqwest::Client,
    base_url: Url,
    service_id: String,
}

impl FastlyClient {
    /// Create a client for `service_id` authenticated with `api_key`.
    pub fn new(api_url: &str, api_key: &str, service_id: &str) -> Result<Self, CdnError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| CdnError::Config("API key is not a valid header value".to_string()))?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| CdnError::Config(format!("failed to build HTTP client: {e}")))?;

        let base_url = Url::parse(api_url)
            .map_err(|e| CdnError::Config(format!("invalid API URL '{api_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CdnError::Config(format!("invalid API URL '{api_url}'")));
        }

        Ok(Self {
            client,
            base_url,
            service_id: service_id.to_string(),
        })
    }

    /// Build `<base>/service/<id>[/version/<n>]/<segments..>`, escaping each segment.
    fn url(&self, version: Option<u32>, segments: &[&str]) -> Result<Url, CdnError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| CdnError::Config(format!("invalid API URL '{}'", self.base_url)))?;
            path.pop_if_empty().push("service").push(&self.service_id);
            if let Some(v) = version {
                path.push("version").push(&v.to_string());
            }
            path.extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(method = %method, url = %url, "CDN API request");
        self.client.request(method, url)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CdnError> {
        let response = check(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| CdnError::Decode(e.to_string()))
    }
}

/// Turn a non-2xx response into an API error carrying the body.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, CdnError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, "CDN API error");
    Err(CdnError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CdnApi for FastlyClient {
    async fn list_versions(&self) -> Result<Vec<ConfigVersion>, CdnError> {
        let url = self.url(None, &["version"])?;
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn list_backends(&self, version: u32) -> Result<Vec<Backend>, CdnError> {
        let url = self.url(Some(version), &["backend"])?;
        let records: Vec<BackendRecord> = self.send_json(self.request(Method::GET, url)).await?;
        records.into_iter().map(Backend::try_from).collect()
    }

    async fn create_backend(&self, version: u32, backend: &NewBackend) -> Result<(), CdnError> {
        let url = self.url(Some(version), &["backend"])?;
        let request = self
            .request(Method::POST, url)
            .form(&backend.form_fields());
        check(request.send().await?).await?;
        Ok(())
    }

    async fn delete_backend(&self, version: u32, name: &str) -> Result<(), CdnError> {
        let url = self.url(Some(version), &["backend", name])?;
        check(self.request(Method::DELETE, url).send().await?).await?;
        Ok(())
    }

    async fn activate_version(&self, version: u32) -> Result<ConfigVersion, CdnError> {
        let url = self.url(Some(version), &["activate"])?;
        self.send_json(self.request(Method::PUT, url)).await
    }

    async fn clone_version(&self, version: u32) -> Result<ConfigVersion, CdnError> {
        let url = self.url(Some(version), &["clone"])?;
        self.send_json(self.request(Method::PUT, url)).await
    }
}
