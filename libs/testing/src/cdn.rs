//! In-memory versioned CDN service.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use nbdeploy_cdn::{Backend, BackendPolicy, CdnApi, CdnError, ConfigVersion, NewBackend};
use tracing::debug;

/// A call made against [`FakeCdn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdnCall {
    ListVersions,
    ListBackends(u32),
    CreateBackend { version: u32, name: String },
    DeleteBackend { version: u32, name: String },
    Activate(u32),
    Clone(u32),
}

impl CdnCall {
    /// Whether the call changes service state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::ListVersions | Self::ListBackends(_))
    }
}

#[derive(Debug, Default)]
struct CdnState {
    versions: BTreeMap<u32, ConfigVersion>,
    backends: BTreeMap<u32, Vec<Backend>>,
    calls: Vec<CdnCall>,
    failing_creates: BTreeSet<String>,
    failing_deletes: BTreeSet<String>,
}

/// A CDN service that enforces the draft/active version rules.
///
/// - Only versions that are neither active nor locked accept backend edits.
/// - Activating a version locks it and deactivates every other version.
/// - Cloning creates `max + 1` with a copy of the source's backends.
#[derive(Debug, Default)]
pub struct FakeCdn {
    state: Mutex<CdnState>,
}

/// Policy used by [`backend`] and as the service-wide template in tests.
pub fn template_policy() -> BackendPolicy {
    BackendPolicy {
        healthcheck: Some("nbviewer-health".to_string()),
        max_conn: Some(200),
        weight: Some(100),
        error_threshold: Some(0),
        connect_timeout: Some(1000),
        between_bytes_timeout: Some(10000),
        first_byte_timeout: Some(15000),
        auto_loadbalance: Some(true),
    }
}

/// A backend carrying [`template_policy`].
pub fn backend(name: &str, address: &str, port: u16) -> Backend {
    Backend {
        name: name.to_string(),
        address: address.to_string(),
        port,
        policy: template_policy(),
    }
}

impl FakeCdn {
    /// Service whose only version (1) is active with `backends`.
    pub fn with_active(backends: Vec<Backend>) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.lock();
            state.versions.insert(
                1,
                ConfigVersion {
                    number: 1,
                    active: true,
                    locked: true,
                    comment: None,
                },
            );
            state.backends.insert(1, backends);
        }
        fake
    }

    /// Service with version 1 active and an editable clone (2) on top.
    pub fn with_draft(backends: Vec<Backend>) -> Self {
        let fake = Self::with_active(backends.clone());
        {
            let mut state = fake.lock();
            state.versions.insert(
                2,
                ConfigVersion {
                    number: 2,
                    active: false,
                    locked: false,
                    comment: None,
                },
            );
            state.backends.insert(2, backends);
        }
        fake
    }

    /// Service without any versions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reject creation of the backend named `name` with a 500.
    pub fn fail_create(self, name: &str) -> Self {
        self.lock().failing_creates.insert(name.to_string());
        self
    }

    /// Reject deletion of the backend named `name` with a 500.
    pub fn fail_delete(self, name: &str) -> Self {
        self.lock().failing_deletes.insert(name.to_string());
        self
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_creates.clear();
        state.failing_deletes.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CdnState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<CdnCall> {
        self.lock().calls.clone()
    }

    /// Number of state-changing calls so far.
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn versions(&self) -> Vec<ConfigVersion> {
        self.lock().versions.values().cloned().collect()
    }

    pub fn latest(&self) -> Option<ConfigVersion> {
        self.lock().versions.values().next_back().cloned()
    }

    pub fn active(&self) -> Option<ConfigVersion> {
        self.lock().versions.values().find(|v| v.active).cloned()
    }

    pub fn backends_of(&self, version: u32) -> Vec<Backend> {
        self.lock().backends.get(&version).cloned().unwrap_or_default()
    }

    /// Backends of the active version.
    pub fn active_backends(&self) -> Vec<Backend> {
        self.active()
            .map(|v| self.backends_of(v.number))
            .unwrap_or_default()
    }

    /// `(address, port)` pairs of the active version.
    pub fn active_endpoints(&self) -> BTreeSet<(String, u16)> {
        self.active_backends()
            .into_iter()
            .map(|b| (b.address, b.port))
            .collect()
    }
}

fn not_found(what: &str) -> CdnError {
    CdnError::Api {
        status: 404,
        body: format!("{{\"msg\":\"Record not found\",\"detail\":\"{what}\"}}"),
    }
}

fn editable(state: &CdnState, version: u32) -> Result<(), CdnError> {
    let v = state
        .versions
        .get(&version)
        .ok_or_else(|| not_found(&format!("version {version}")))?;
    if v.is_editable() {
        Ok(())
    } else {
        Err(CdnError::Api {
            status: 400,
            body: format!("{{\"msg\":\"Version {version} is locked\"}}"),
        })
    }
}

#[async_trait]
impl CdnApi for FakeCdn {
    async fn list_versions(&self) -> Result<Vec<ConfigVersion>, CdnError> {
        let mut state = self.lock();
        state.calls.push(CdnCall::ListVersions);
        Ok(state.versions.values().cloned().collect())
    }

    async fn list_backends(&self, version: u32) -> Result<Vec<Backend>, CdnError> {
        let mut state = self.lock();
        state.calls.push(CdnCall::ListBackends(version));
        if !state.versions.contains_key(&version) {
            return Err(not_found(&format!("version {version}")));
        }
        Ok(state.backends.get(&version).cloned().unwrap_or_default())
    }

    async fn create_backend(&self, version: u32, backend: &NewBackend) -> Result<(), CdnError> {
        let mut state = self.lock();
        state.calls.push(CdnCall::CreateBackend {
            version,
            name: backend.name.clone(),
        });
        editable(&state, version)?;
        if state.failing_creates.contains(&backend.name) {
            return Err(CdnError::Api {
                status: 500,
                body: format!("{{\"msg\":\"could not create {}\"}}", backend.name),
            });
        }

        let pool = state.backends.entry(version).or_default();
        if pool.iter().any(|b| b.name == backend.name) {
            return Err(CdnError::Api {
                status: 409,
                body: format!("{{\"msg\":\"Duplicate record\",\"detail\":\"{}\"}}", backend.name),
            });
        }
        debug!(version, name = %backend.name, "[FAKE] Created backend");
        pool.push(backend.clone().into_backend());
        Ok(())
    }

    async fn delete_backend(&self, version: u32, name: &str) -> Result<(), CdnError> {
        let mut state = self.lock();
        state.calls.push(CdnCall::DeleteBackend {
            version,
            name: name.to_string(),
        });
        editable(&state, version)?;
        if state.failing_deletes.contains(name) {
            return Err(CdnError::Api {
                status: 500,
                body: format!("{{\"msg\":\"could not delete {name}\"}}"),
            });
        }

        let pool = state.backends.entry(version).or_default();
        let before = pool.len();
        pool.retain(|b| b.name != name);
        if pool.len() == before {
            return Err(not_found(name));
        }
        debug!(version, name, "[FAKE] Deleted backend");
        Ok(())
    }

    async fn activate_version(&self, version: u32) -> Result<ConfigVersion, CdnError> {
        let mut state = self.lock();
        state.calls.push(CdnCall::Activate(version));
        if !state.versions.contains_key(&version) {
            return Err(not_found(&format!("version {version}")));
        }
        for v in state.versions.values_mut() {
            v.active = v.number == version;
            if v.active {
                v.locked = true;
            }
        }
        debug!(version, "[FAKE] Activated version");
        Ok(state.versions[&version].clone())
    }

    async fn clone_version(&self, version: u32) -> Result<ConfigVersion, CdnError> {
        let mut state = self.lock();
        state.calls.push(CdnCall::Clone(version));
        if !state.versions.contains_key(&version) {
            return Err(not_found(&format!("version {version}")));
        }
        let number = state.versions.keys().next_back().copied().unwrap_or(0) + 1;
        let cloned = ConfigVersion {
            number,
            active: false,
            locked: false,
            comment: None,
        };
        let backends = state.backends.get(&version).cloned().unwrap_or_default();
        state.versions.insert(number, cloned.clone());
        state.backends.insert(number, backends);
        debug!(from = version, to = number, "[FAKE] Cloned version");
        Ok(cloned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_active_version_rejects_edits() {
        let cdn = FakeCdn::with_active(vec![backend("a-8080", "10.0.0.1", 8080)]);
        let err = cdn.delete_backend(1, "a-8080").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(cdn.active_backends().len(), 1);
    }

    #[tokio::test]
    async fn test_clone_then_activate() {
        let cdn = FakeCdn::with_active(vec![backend("a-8080", "10.0.0.1", 8080)]);
        let draft = cdn.clone_version(1).await.unwrap();
        assert_eq!(draft.number, 2);

        cdn.delete_backend(2, "a-8080").await.unwrap();
        cdn.activate_version(2).await.unwrap();

        assert_eq!(cdn.active().unwrap().number, 2);
        assert!(cdn.active_backends().is_empty());
        assert_eq!(cdn.backends_of(1).len(), 1);
        assert_eq!(cdn.mutation_count(), 3);
    }
}
