//! Applying a backend plan against the versioned configuration.

use std::collections::BTreeSet;

use nbdeploy_cdn::{
    latest_version, Backend, BackendPolicy, CdnApi, CdnError, ConfigVersion, DraftVersion,
    NewBackend,
};
use tracing::{debug, info};

use crate::instance::{Endpoint, InstanceSet};
use crate::plan::BackendPlan;
use crate::{BackendAction, ReconcileError};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pool already matched; nothing was touched.
    Unchanged,

    /// Mutations were applied and activated. A draft left behind by an
    /// interrupted pass is activated with no new mutations.
    Applied {
        /// Version now serving traffic.
        activated: u32,
        /// Fresh draft cloned after activation.
        draft: u32,
        /// Names of deleted backends.
        removed: Vec<String>,
        /// Names of created backends.
        added: Vec<String>,
    },
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A computed plan together with the version it was computed against.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Latest version at planning time.
    pub version: u32,

    /// Backends read from that version.
    pub configured: Vec<Backend>,

    pub plan: BackendPlan,

    /// The latest version is a draft whose endpoints differ from the
    /// active version, so it must be activated even with an empty plan.
    pub pending_activation: bool,
}

impl PlannedChange {
    /// Whether a pass would touch the service at all.
    pub fn is_noop(&self) -> bool {
        self.plan.is_empty() && !self.pending_activation
    }
}

fn endpoints(backends: &[Backend]) -> BTreeSet<Endpoint> {
    backends.iter().map(Endpoint::of_backend).collect()
}

/// Keeps the CDN backend pool equal to the live instance set.
pub struct BackendReconciler<'a, A: CdnApi + ?Sized> {
    api: &'a A,
    default_template: Option<BackendPolicy>,
}

impl<'a, A: CdnApi + ?Sized> BackendReconciler<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            default_template: None,
        }
    }

    /// Policy used for new backends when the pool is empty.
    pub fn with_default_template(mut self, template: Option<BackendPolicy>) -> Self {
        self.default_template = template;
        self
    }

    /// Compute the plan without mutating anything.
    pub async fn plan(&self, live: &InstanceSet) -> Result<PlannedChange, ReconcileError> {
        Ok(self.read(live).await?.1)
    }

    async fn read(
        &self,
        live: &InstanceSet,
    ) -> Result<(ConfigVersion, PlannedChange), ReconcileError> {
        let versions = self.api.list_versions().await?;
        let latest = latest_version(&versions).ok_or(CdnError::NoVersions)?.clone();
        let configured = self.api.list_backends(latest.number).await?;
        let plan = BackendPlan::compute(&configured, live);
        let pending_activation = self.draft_diverged(&versions, &latest, &configured).await?;

        debug!(
            version = latest.number,
            configured = configured.len(),
            live = live.len(),
            remove = plan.remove.len(),
            add = plan.add.len(),
            pending_activation,
            "Computed backend plan"
        );

        let planned = PlannedChange {
            version: latest.number,
            configured,
            plan,
            pending_activation,
        };
        Ok((latest, planned))
    }

    /// Whether an editable latest version holds endpoints the active
    /// version does not serve, or lacks ones it does.
    async fn draft_diverged(
        &self,
        versions: &[ConfigVersion],
        latest: &ConfigVersion,
        configured: &[Backend],
    ) -> Result<bool, ReconcileError> {
        if !latest.is_editable() {
            return Ok(false);
        }
        let active = match versions.iter().find(|v| v.active) {
            Some(active) => self.api.list_backends(active.number).await?,
            None => Vec::new(),
        };
        Ok(endpoints(configured) != endpoints(&active))
    }

    /// Run one reconciliation pass.
    ///
    /// Deletions run before additions. The first failing call aborts the
    /// pass and leaves the draft as far as it got; running again recomputes
    /// the plan from that draft and activates it even when nothing is left
    /// to mutate.
    pub async fn reconcile(&self, live: &InstanceSet) -> Result<ReconcileOutcome, ReconcileError> {
        let (latest, planned) = self.read(live).await?;
        if planned.is_noop() {
            info!(
                version = latest.number,
                backends = planned.configured.len(),
                "Backend pool up to date"
            );
            return Ok(ReconcileOutcome::Unchanged);
        }
        if planned.pending_activation && planned.plan.is_empty() {
            info!(version = latest.number, "Draft differs from the active version");
        }
        let PlannedChange { configured, plan, .. } = planned;

        // Template comes from the first backend read, before any deletion.
        let template = match configured.first() {
            Some(backend) => Some(backend.policy.clone()),
            None => self.default_template.clone(),
        };
        let template = match (template, plan.add.first()) {
            (Some(template), _) => template,
            (None, None) => BackendPolicy::default(),
            (None, Some(instance)) => {
                return Err(ReconcileError::MissingTemplate {
                    instance: instance.identity.clone(),
                })
            }
        };

        let mut draft = DraftVersion::from_latest(self.api, &latest).await?;

        let mut removed = Vec::with_capacity(plan.remove.len());
        for backend in &plan.remove {
            info!(
                version = draft.number(),
                backend = %backend.name,
                address = %backend.address,
                port = backend.port,
                "Deleting backend"
            );
            draft
                .remove_backend(&backend.name)
                .await
                .map_err(|source| ReconcileError::Apply {
                    action: BackendAction::Delete,
                    backend: backend.name.clone(),
                    source,
                })?;
            removed.push(backend.name.clone());
        }

        let mut added = Vec::with_capacity(plan.add.len());
        for instance in &plan.add {
            info!(
                version = draft.number(),
                backend = %instance.identity,
                address = %instance.host,
                port = instance.port,
                "Adding backend"
            );
            let backend =
                NewBackend::from_template(&instance.identity, &instance.host, instance.port, &template);
            draft
                .add_backend(&backend)
                .await
                .map_err(|source| ReconcileError::Apply {
                    action: BackendAction::Create,
                    backend: instance.identity.clone(),
                    source,
                })?;
            added.push(instance.identity.clone());
        }

        info!(version = draft.number(), "Activating configuration");
        let deployed = draft.deploy().await?;

        Ok(ReconcileOutcome::Applied {
            activated: deployed.activated,
            draft: deployed.draft,
            removed,
            added,
        })
    }
}
