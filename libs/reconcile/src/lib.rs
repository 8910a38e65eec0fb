//! CDN backend reconciliation.
//!
//! Converges the CDN's backend pool to the fleet's live instances:
//!
//! - **Desired state**: the live instance set, read from the container
//!   runtime on every run.
//! - **Current state**: the backends of the latest configuration version.
//! - **Convergence**: delete backends without an instance, create backends
//!   for instances without one, then activate.
//!
//! # Invariants
//!
//! - Backends are identified by `(address, port)`, never by name
//! - Backends present on both sides are never deleted and recreated
//! - A pass with nothing to do issues no mutating call
//! - Passes are idempotent from any partially-applied state; a draft whose
//!   endpoints differ from the active version is always activated

use std::fmt;

use nbdeploy_cdn::CdnError;
use thiserror::Error;

mod instance;
mod plan;
mod reconciler;

pub use instance::{Endpoint, Instance, InstanceSet};
pub use plan::BackendPlan;
pub use reconciler::{BackendReconciler, PlannedChange, ReconcileOutcome};

/// Mutation kinds issued during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendAction {
    Create,
    Delete,
}

impl fmt::Display for BackendAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// New backends are needed but there is nothing to copy policy from.
    #[error(
        "no template backend to copy policy from for '{instance}'; configure a default backend template"
    )]
    MissingTemplate { instance: String },

    /// A mutating call failed mid-pass.
    #[error("failed to {action} backend '{backend}': {source}")]
    Apply {
        action: BackendAction,
        backend: String,
        #[source]
        source: CdnError,
    },

    /// Reading state, cloning or activating failed.
    #[error(transparent)]
    Cdn(#[from] CdnError),
}
