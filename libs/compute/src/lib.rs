//! Compute provider access for clustered deployments.
//!
//! Fleet hosts are servers named `<prefix>-<n>` at the provider. This crate
//! lists them (for fleet inspection), provisions the next one, and makes
//! sure the deploy SSH key is registered.

pub mod client;
pub mod error;
pub mod provision;
pub mod types;

pub use client::{ComputeProvider, RackspaceClient, DEFAULT_IDENTITY_URL};
pub use error::ComputeError;
pub use provision::{
    ensure_keypair, next_server_name, pick_image, provision_server, server_number, ServerTemplate,
};
pub use types::{Image, Keypair, NewServer, Server, ServerAddress};
