// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use lokinet_profile_store::{ProfileStore, TunnelProfile};

use super::{error::VpnError, host_thread::call_host};
use crate::uniffi_custom_impls::TunnelProfileRecord;

/// The host's VPN preferences, e.g. `NETunnelProviderManager` on iOS.
#[uniffi::export(with_foreign)]
pub trait OSTunnelProfileStore: Send + Sync + std::fmt::Debug {
    /// Every stored profile, in the order the OS enumerates them.
    fn load_all_profiles(&self) -> Result<Vec<TunnelProfileRecord>, VpnError>;

    /// Reloads the profile from the preferences.
    fn load_profile(&self, profile: TunnelProfileRecord) -> Result<TunnelProfileRecord, VpnError>;

    fn save_profile(&self, profile: TunnelProfileRecord) -> Result<(), VpnError>;
}

/// Drives an [`OSTunnelProfileStore`] from async code. The host calls block until the OS
/// completion handler fires, so each one runs on its own thread outside the runtime.
#[derive(Clone, Debug)]
pub struct ForeignProfileStore {
    inner: Arc<dyn OSTunnelProfileStore>,
}

impl ForeignProfileStore {
    pub fn new(inner: Arc<dyn OSTunnelProfileStore>) -> Self {
        Self { inner }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, VpnError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn OSTunnelProfileStore) -> Result<T, VpnError> + Send + 'static,
    {
        let inner = self.inner.clone();
        call_host("lokinet-profile-store", move || f(inner.as_ref())).await?
    }
}

impl ProfileStore for ForeignProfileStore {
    type StorageError = VpnError;

    async fn load_all(&self) -> Result<Vec<TunnelProfile>, VpnError> {
        self.call(|store| store.load_all_profiles())
            .await?
            .into_iter()
            .map(TunnelProfile::try_from)
            .collect()
    }

    async fn load(&self, profile: &TunnelProfile) -> Result<TunnelProfile, VpnError> {
        let record = TunnelProfileRecord::from(profile.clone());
        let loaded = self.call(move |store| store.load_profile(record)).await?;
        TunnelProfile::try_from(loaded)
    }

    async fn save(&self, profile: &TunnelProfile) -> Result<(), VpnError> {
        let record = TunnelProfileRecord::from(profile.clone());
        self.call(move |store| store.save_profile(record)).await
    }
}
