//! Live instances and their endpoints.

use std::collections::BTreeMap;
use std::fmt;

use nbdeploy_cdn::Backend;
use serde::Serialize;

/// Canonical identity of a backend or instance: `(address, port)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint a configured backend points at.
    pub fn of_backend(backend: &Backend) -> Self {
        Self::new(backend.address.clone(), backend.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One addressable unit of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    /// Address reachable from the CDN.
    pub host: String,

    pub port: u16,

    /// Label the backend for this instance is named after.
    pub identity: String,
}

impl Instance {
    pub fn new(host: impl Into<String>, port: u16, identity: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            identity: identity.into(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

/// Live instances, de-duplicated by endpoint.
///
/// The first instance seen for an endpoint wins; iteration is ordered by
/// endpoint so plans are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSet {
    by_endpoint: BTreeMap<Endpoint, Instance>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance. Returns false if its endpoint was already present.
    pub fn insert(&mut self, instance: Instance) -> bool {
        let endpoint = instance.endpoint();
        if self.by_endpoint.contains_key(&endpoint) {
            return false;
        }
        self.by_endpoint.insert(endpoint, instance);
        true
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.by_endpoint.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.by_endpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.by_endpoint.values()
    }
}

impl FromIterator<Instance> for InstanceSet {
    fn from_iter<I: IntoIterator<Item = Instance>>(iter: I) -> Self {
        let mut set = Self::new();
        for instance in iter {
            set.insert(instance);
        }
        set
    }
}

impl<'a> IntoIterator for &'a InstanceSet {
    type Item = &'a Instance;
    type IntoIter = std::collections::btree_map::Values<'a, Endpoint, Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_endpoint.values()
    }
}
