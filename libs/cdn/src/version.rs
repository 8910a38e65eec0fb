//! Draft/active version handling.
//!
//! The edge configuration is versioned: exactly one version serves traffic,
//! and only a draft (never active, never locked) accepts mutations. A
//! [`DraftVersion`] wraps one draft for the duration of a change set:
//!
//! 1. [`DraftVersion::open`] reuses the latest version when it is still a
//!    draft, otherwise clones it.
//! 2. Mutations go through [`DraftVersion::add_backend`] and
//!    [`DraftVersion::remove_backend`].
//! 3. [`DraftVersion::deploy`] activates the draft and immediately clones
//!    the now-active version, so the next run always finds a draft.

use tracing::info;

use crate::client::CdnApi;
use crate::error::CdnError;
use crate::types::{latest_version, ConfigVersion, NewBackend};

/// Outcome of [`DraftVersion::deploy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployed {
    /// Version that is now serving traffic.
    pub activated: u32,

    /// Fresh draft cloned from it.
    pub draft: u32,
}

/// An editable configuration version.
pub struct DraftVersion<'a, A: CdnApi + ?Sized> {
    api: &'a A,
    number: u32,
}

impl<'a, A: CdnApi + ?Sized> DraftVersion<'a, A> {
    /// Obtain a draft starting from the latest version.
    pub async fn open(api: &'a A) -> Result<Self, CdnError> {
        let versions = api.list_versions().await?;
        let latest = latest_version(&versions).ok_or(CdnError::NoVersions)?;
        Self::from_latest(api, latest).await
    }

    /// Obtain a draft given an already-fetched latest version.
    pub async fn from_latest(api: &'a A, latest: &ConfigVersion) -> Result<Self, CdnError> {
        if latest.is_editable() {
            return Ok(Self {
                api,
                number: latest.number,
            });
        }

        let cloned = api.clone_version(latest.number).await?;
        info!(from = latest.number, draft = cloned.number, "Cloned configuration version");
        Ok(Self {
            api,
            number: cloned.number,
        })
    }

    /// Draft version number.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Add a backend to the draft.
    pub async fn add_backend(&self, backend: &NewBackend) -> Result<(), CdnError> {
        self.api.create_backend(self.number, backend).await
    }

    /// Remove a backend from the draft.
    pub async fn remove_backend(&self, name: &str) -> Result<(), CdnError> {
        self.api.delete_backend(self.number, name).await
    }

    /// Activate the draft, then clone a new draft from it.
    pub async fn deploy(&mut self) -> Result<Deployed, CdnError> {
        let activated = self.api.activate_version(self.number).await?;
        info!(version = activated.number, "Activated configuration version");

        let draft = self.api.clone_version(activated.number).await?;
        self.number = draft.number;

        Ok(Deployed {
            activated: activated.number,
            draft: draft.number,
        })
    }
}
