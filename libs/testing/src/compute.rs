//! In-memory compute provider.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use nbdeploy_compute::{ComputeError, ComputeProvider, Image, Keypair, NewServer, Server};

#[derive(Debug, Default)]
struct ComputeState {
    servers: Vec<Server>,
    images: Vec<Image>,
    keypairs: Vec<Keypair>,
    created: Vec<NewServer>,
}

/// Compute provider holding servers, images and keypairs in memory.
#[derive(Debug, Default)]
pub struct FakeCompute {
    state: Mutex<ComputeState>,
}

/// An active server with a public address.
pub fn server(name: &str, ip: &str) -> Server {
    Server {
        id: format!("{name}-id"),
        name: name.to_string(),
        status: "ACTIVE".to_string(),
        access_ipv4: Some(ip.to_string()),
        addresses: Default::default(),
        created: None,
    }
}

impl FakeCompute {
    pub fn new(servers: Vec<Server>, images: Vec<Image>) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.lock();
            state.servers = servers;
            state.images = images;
        }
        fake
    }

    pub fn with_keypair(self, name: &str) -> Self {
        self.lock().keypairs.push(Keypair {
            name: name.to_string(),
            public_key: "ssh-ed25519 AAAA".to_string(),
            fingerprint: None,
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, ComputeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create requests received so far.
    pub fn created(&self) -> Vec<NewServer> {
        self.lock().created.clone()
    }

    pub fn keypairs(&self) -> Vec<Keypair> {
        self.lock().keypairs.clone()
    }
}

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>, ComputeError> {
        Ok(self
            .lock()
            .servers
            .iter()
            .filter(|s| s.name.contains(name))
            .cloned()
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<Image>, ComputeError> {
        Ok(self.lock().images.clone())
    }

    async fn create_server(&self, request: &NewServer) -> Result<Server, ComputeError> {
        let mut state = self.lock();
        if !state.images.iter().any(|i| i.id == request.image_id) {
            return Err(ComputeError::Api {
                status: 400,
                body: format!("Invalid imageRef provided: {}", request.image_id),
            });
        }
        let server = Server {
            id: format!("srv-{}", state.created.len() + 1),
            name: request.name.clone(),
            status: "BUILD".to_string(),
            access_ipv4: None,
            addresses: Default::default(),
            created: None,
        };
        state.created.push(request.clone());
        state.servers.push(server.clone());
        Ok(server)
    }

    async fn list_keypairs(&self) -> Result<Vec<Keypair>, ComputeError> {
        Ok(self.lock().keypairs.clone())
    }

    async fn create_keypair(&self, name: &str, public_key: &str) -> Result<Keypair, ComputeError> {
        let mut state = self.lock();
        if state.keypairs.iter().any(|k| k.name == name) {
            return Err(ComputeError::Api {
                status: 409,
                body: format!("Key pair '{name}' already exists."),
            });
        }
        let keypair = Keypair {
            name: name.to_string(),
            public_key: public_key.to_string(),
            fingerprint: None,
        };
        state.keypairs.push(keypair.clone());
        Ok(keypair)
    }
}
