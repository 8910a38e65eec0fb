//! Backend diff computation.

use std::collections::BTreeSet;

use nbdeploy_cdn::Backend;
use serde::Serialize;

use crate::instance::{Endpoint, Instance, InstanceSet};

/// Changes needed to make the backend pool match the live instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendPlan {
    /// Configured backends with no live instance, in configured order.
    pub remove: Vec<Backend>,

    /// Live instances with no backend, in endpoint order.
    pub add: Vec<Instance>,

    /// Endpoints present on both sides (left untouched).
    pub keep: Vec<Endpoint>,
}

impl BackendPlan {
    /// Diff `configured` against `live`, keyed by `(address, port)`.
    pub fn compute(configured: &[Backend], live: &InstanceSet) -> Self {
        let mut plan = Self::default();
        let mut existing = BTreeSet::new();

        for backend in configured {
            let endpoint = Endpoint::of_backend(backend);
            if live.contains(&endpoint) {
                if existing.insert(endpoint.clone()) {
                    plan.keep.push(endpoint);
                }
            } else {
                plan.remove.push(backend.clone());
            }
        }

        plan.add = live
            .iter()
            .filter(|instance| !existing.contains(&instance.endpoint()))
            .cloned()
            .collect();

        plan
    }

    /// True when the pool already matches.
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }

    /// Number of mutating calls the plan needs (excluding activation).
    pub fn mutation_count(&self) -> usize {
        self.remove.len() + self.add.len()
    }
}
