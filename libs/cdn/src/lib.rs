//! CDN edge configuration client.
//!
//! Reads and edits the backend pool of one CDN service through its
//! versioned configuration API:
//!
//! - **Backends**: origin servers, identified by name within a version.
//! - **Versions**: immutable numbered snapshots; one is active, edits go to
//!   a draft that is later activated.
//!
//! The [`CdnApi`] trait is the seam between reconciliation logic and the
//! HTTP client ([`FastlyClient`]).

pub mod client;
pub mod error;
pub mod types;
pub mod version;

pub use client::{CdnApi, FastlyClient, DEFAULT_API_URL};
pub use error::CdnError;
pub use types::{latest_version, Backend, BackendPolicy, ConfigVersion, NewBackend};
pub use version::{Deployed, DraftVersion};
