// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! Registers and enables the system VPN profile that routes traffic through the Lokinet packet
//! tunnel extension.
//!
//! One pass runs per process launch: enumerate the stored profiles, pick the one belonging to our
//! extension (or create a fresh one), reload it, name and enable it, and save it back. Store
//! failures along the way are logged and collected but never abort the pass.

use lokinet_profile_store::{
    load_all_profiles, load_profile, save_profile, ProfileStore, ProfileStoreError, TunnelProfile,
};
use serde::{Deserialize, Serialize};

use crate::{config::ProfileSettings, error::Error};

pub const DEFAULT_PROVIDER_BUNDLE_IDENTIFIER: &str = "org.lokinet.NetworkExtension";
pub const DEFAULT_PROFILE_NAME: &str = "Lokinet";

/// What to do when several stored profiles point at our extension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateProfilePolicy {
    /// The last matching profile in enumeration order is used.
    #[default]
    LastWins,
    /// Several matches are a misconfiguration and fail the pass.
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileManagerConfig {
    pub provider_bundle_identifier: String,
    pub display_name: String,
    pub duplicate_policy: DuplicateProfilePolicy,
}

impl Default for ProfileManagerConfig {
    fn default() -> Self {
        Self {
            provider_bundle_identifier: DEFAULT_PROVIDER_BUNDLE_IDENTIFIER.to_owned(),
            display_name: DEFAULT_PROFILE_NAME.to_owned(),
            duplicate_policy: DuplicateProfilePolicy::default(),
        }
    }
}

impl From<ProfileSettings> for ProfileManagerConfig {
    fn from(settings: ProfileSettings) -> Self {
        Self {
            provider_bundle_identifier: settings.provider_bundle_identifier,
            display_name: settings.display_name,
            duplicate_policy: settings.duplicate_policy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileManagerState {
    Uninitialized,
    CandidateSelected,
    NoCandidate,
    Loaded,
    Enabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileOrigin {
    /// A stored profile for our extension was found.
    Existing,
    /// Nothing matched and a fresh profile was created.
    Created,
}

/// Outcome of one manager pass.
#[derive(Debug)]
pub struct ProfilePass {
    pub profile: TunnelProfile,
    pub origin: ProfileOrigin,
    /// False when the final save failed and the enabled profile only exists in memory.
    pub persisted: bool,
    pub history: Vec<ProfileManagerState>,
    pub warnings: Vec<ProfileStoreError>,
}

/// Picks the profile belonging to `identifier` out of `profiles`.
pub fn select_profile(
    profiles: Vec<TunnelProfile>,
    identifier: &str,
    policy: DuplicateProfilePolicy,
) -> Result<Option<TunnelProfile>, Error> {
    let mut matching: Vec<TunnelProfile> = profiles
        .into_iter()
        .filter(|profile| profile.provider_bundle_identifier() == Some(identifier))
        .collect();

    if matching.len() > 1 {
        match policy {
            DuplicateProfilePolicy::LastWins => {
                tracing::warn!(
                    "Found {} tunnel profiles for {identifier}, using the last one",
                    matching.len()
                );
            }
            DuplicateProfilePolicy::Reject => {
                return Err(Error::DuplicateProfiles {
                    identifier: identifier.to_owned(),
                    count: matching.len(),
                });
            }
        }
    }

    Ok(matching.pop())
}

pub struct ProfileManager<S> {
    store: S,
    config: ProfileManagerConfig,
    state: ProfileManagerState,
    history: Vec<ProfileManagerState>,
}

impl<S: ProfileStore> ProfileManager<S> {
    pub fn new(store: S, config: ProfileManagerConfig) -> Self {
        Self {
            store,
            config,
            state: ProfileManagerState::Uninitialized,
            history: vec![ProfileManagerState::Uninitialized],
        }
    }

    pub fn state(&self) -> ProfileManagerState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn reset(&mut self) {
        self.state = ProfileManagerState::Uninitialized;
        self.history = vec![ProfileManagerState::Uninitialized];
    }

    fn transition(&mut self, next: ProfileManagerState) {
        tracing::debug!("Profile manager: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Runs the enumerate, load, enable and save sequence once. Every call is a fresh pass starting
    /// from [`ProfileManagerState::Uninitialized`].
    ///
    /// # Errors
    ///
    /// Only fails when several profiles match and the policy is
    /// [`DuplicateProfilePolicy::Reject`]. Store failures are reported in
    /// [`ProfilePass::warnings`].
    pub async fn enable(&mut self) -> Result<ProfilePass, Error> {
        tracing::info!(
            "Enabling tunnel profile for {}",
            self.config.provider_bundle_identifier
        );
        self.reset();
        let mut warnings = Vec::new();

        let saved = match load_all_profiles(&self.store).await {
            Ok(profiles) => profiles,
            Err(err) => {
                tracing::warn!("{err}");
                warnings.push(err);
                Vec::new()
            }
        };

        let selected = select_profile(
            saved,
            &self.config.provider_bundle_identifier,
            self.config.duplicate_policy,
        )?;

        let (candidate, origin) = match selected {
            Some(profile) => {
                tracing::info!("Found saved tunnel profile {}", profile.id);
                self.transition(ProfileManagerState::CandidateSelected);
                (profile, ProfileOrigin::Existing)
            }
            None => {
                self.transition(ProfileManagerState::NoCandidate);
                (
                    TunnelProfile::new(self.config.provider_bundle_identifier.clone()),
                    ProfileOrigin::Created,
                )
            }
        };

        let mut profile = match load_profile(&candidate, &self.store).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!("{err}");
                warnings.push(err);
                candidate
            }
        };
        self.transition(ProfileManagerState::Loaded);

        profile.localized_description = self.config.display_name.clone();
        profile.enabled = true;

        let persisted = match save_profile(&profile, &self.store).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("{err}");
                warnings.push(err);
                false
            }
        };
        self.transition(ProfileManagerState::Enabled);
        tracing::info!("Tunnel profile enabled: {profile} (persisted: {persisted})");

        Ok(ProfilePass {
            profile,
            origin,
            persisted,
            history: self.history.clone(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use lokinet_profile_store::InMemEphemeralProfiles;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("preferences unavailable")]
    struct Unavailable;

    /// Wraps an in-memory store and fails the selected operations.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemEphemeralProfiles,
        fail_load_all: AtomicBool,
        fail_load: AtomicBool,
        fail_save: AtomicBool,
    }

    impl ProfileStore for FlakyStore {
        type StorageError = Unavailable;

        async fn load_all(&self) -> Result<Vec<TunnelProfile>, Unavailable> {
            if self.fail_load_all.load(Ordering::SeqCst) {
                return Err(Unavailable);
            }
            Ok(self.inner.load_all().await.unwrap())
        }

        async fn load(&self, profile: &TunnelProfile) -> Result<TunnelProfile, Unavailable> {
            if self.fail_load.load(Ordering::SeqCst) {
                return Err(Unavailable);
            }
            Ok(self.inner.load(profile).await.unwrap())
        }

        async fn save(&self, profile: &TunnelProfile) -> Result<(), Unavailable> {
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(Unavailable);
            }
            self.inner.save(profile).await.unwrap();
            Ok(())
        }
    }

    fn lokinet_profile(enabled: bool) -> TunnelProfile {
        let mut profile = TunnelProfile::new(DEFAULT_PROVIDER_BUNDLE_IDENTIFIER);
        profile.enabled = enabled;
        profile
    }

    #[tokio::test]
    async fn empty_store_gets_a_new_enabled_profile() {
        let mut manager =
            ProfileManager::new(InMemEphemeralProfiles::default(), Default::default());

        let pass = manager.enable().await.unwrap();

        assert_eq!(pass.origin, ProfileOrigin::Created);
        assert!(pass.persisted);
        assert!(pass.warnings.is_empty());
        assert_eq!(
            pass.history,
            vec![
                ProfileManagerState::Uninitialized,
                ProfileManagerState::NoCandidate,
                ProfileManagerState::Loaded,
                ProfileManagerState::Enabled,
            ]
        );

        let stored = manager.store().load(&pass.profile).await.unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.localized_description, "Lokinet");
        assert_eq!(
            stored.provider_bundle_identifier(),
            Some(DEFAULT_PROVIDER_BUNDLE_IDENTIFIER)
        );
    }

    #[tokio::test]
    async fn second_pass_starts_over_and_reuses_the_saved_profile() {
        let mut manager =
            ProfileManager::new(InMemEphemeralProfiles::default(), Default::default());

        let first = manager.enable().await.unwrap();
        let second = manager.enable().await.unwrap();

        assert_eq!(second.origin, ProfileOrigin::Existing);
        assert_eq!(second.profile.id, first.profile.id);
        assert_eq!(
            second.history,
            vec![
                ProfileManagerState::Uninitialized,
                ProfileManagerState::CandidateSelected,
                ProfileManagerState::Loaded,
                ProfileManagerState::Enabled,
            ]
        );
        assert_eq!(manager.store().profiles().await.len(), 1);
    }

    #[tokio::test]
    async fn existing_disabled_profile_is_enabled_in_place() {
        let existing = lokinet_profile(false);
        let store = InMemEphemeralProfiles::with_profiles(vec![existing.clone()]);
        let mut manager = ProfileManager::new(store, Default::default());

        let pass = manager.enable().await.unwrap();

        assert_eq!(pass.origin, ProfileOrigin::Existing);
        assert_eq!(pass.profile.id, existing.id);
        assert_eq!(manager.state(), ProfileManagerState::Enabled);

        let stored = manager.store().profiles().await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].enabled);
        assert_eq!(stored[0].localized_description, "Lokinet");
    }

    #[tokio::test]
    async fn other_extensions_are_ignored() {
        let foreign = TunnelProfile::new("com.example.OtherVpn");
        let mut not_a_provider = TunnelProfile::new("ignored");
        not_a_provider.protocol.provider_bundle_identifier = None;
        let store =
            InMemEphemeralProfiles::with_profiles(vec![foreign.clone(), not_a_provider.clone()]);
        let mut manager = ProfileManager::new(store, Default::default());

        let pass = manager.enable().await.unwrap();

        assert_eq!(pass.origin, ProfileOrigin::Created);
        let stored = manager.store().profiles().await;
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0], foreign);
        assert_eq!(stored[1], not_a_provider);
    }

    #[tokio::test]
    async fn last_matching_profile_wins() {
        let first = lokinet_profile(false);
        let last = lokinet_profile(false);
        let store = InMemEphemeralProfiles::with_profiles(vec![
            first.clone(),
            TunnelProfile::new("com.example.OtherVpn"),
            last.clone(),
        ]);
        let mut manager = ProfileManager::new(store, Default::default());

        let pass = manager.enable().await.unwrap();

        assert_eq!(pass.profile.id, last.id);
        let stored = manager.store().load(&first).await.unwrap();
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn duplicates_are_rejected_when_configured() {
        let store = InMemEphemeralProfiles::with_profiles(vec![
            lokinet_profile(false),
            lokinet_profile(true),
        ]);
        let config = ProfileManagerConfig {
            duplicate_policy: DuplicateProfilePolicy::Reject,
            ..Default::default()
        };
        let mut manager = ProfileManager::new(store, config);

        let result = manager.enable().await;

        assert!(matches!(
            result,
            Err(Error::DuplicateProfiles { count: 2, .. })
        ));
        assert_eq!(manager.state(), ProfileManagerState::Uninitialized);
        assert!(manager
            .store()
            .profiles()
            .await
            .iter()
            .all(|p| p.localized_description.is_empty()));
    }

    #[test]
    fn single_match_is_selected_under_either_policy() {
        let only = lokinet_profile(false);
        for policy in [DuplicateProfilePolicy::LastWins, DuplicateProfilePolicy::Reject] {
            let selected = select_profile(
                vec![TunnelProfile::new("com.example.OtherVpn"), only.clone()],
                DEFAULT_PROVIDER_BUNDLE_IDENTIFIER,
                policy,
            )
            .unwrap();
            assert_eq!(selected, Some(only.clone()));
        }
    }

    #[tokio::test]
    async fn failed_enumeration_still_creates_and_saves_a_profile() {
        let store = FlakyStore::default();
        store.inner.save(&lokinet_profile(false)).await.unwrap();
        store.fail_load_all.store(true, Ordering::SeqCst);
        let mut manager = ProfileManager::new(store, Default::default());

        let pass = manager.enable().await.unwrap();

        assert_eq!(pass.origin, ProfileOrigin::Created);
        assert!(pass.persisted);
        assert!(matches!(
            pass.warnings.as_slice(),
            [ProfileStoreError::FailedToLoadProfiles { .. }]
        ));
    }

    #[tokio::test]
    async fn failed_load_keeps_the_enumerated_profile() {
        let existing = lokinet_profile(false);
        let store = FlakyStore::default();
        store.inner.save(&existing).await.unwrap();
        store.fail_load.store(true, Ordering::SeqCst);
        let mut manager = ProfileManager::new(store, Default::default());

        let pass = manager.enable().await.unwrap();

        assert_eq!(pass.profile.id, existing.id);
        assert!(pass.profile.enabled);
        assert!(pass.persisted);
        assert_eq!(pass.warnings.len(), 1);
    }

    #[tokio::test]
    async fn failed_save_leaves_profile_enabled_only_in_memory() {
        let existing = lokinet_profile(false);
        let store = FlakyStore::default();
        store.inner.save(&existing).await.unwrap();
        store.fail_save.store(true, Ordering::SeqCst);
        let mut manager = ProfileManager::new(store, Default::default());

        let pass = manager.enable().await.unwrap();

        assert!(pass.profile.enabled);
        assert!(!pass.persisted);
        assert_eq!(manager.state(), ProfileManagerState::Enabled);
        assert!(matches!(
            pass.warnings.as_slice(),
            [ProfileStoreError::FailedToSaveProfile { .. }]
        ));
        assert!(!manager.store().inner.load(&existing).await.unwrap().enabled);
    }
}
