// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! Storage for the VPN tunnel profiles the operating system keeps on behalf of the app.
//!
//! The [`ProfileStore`] trait mirrors the load-all / load / save triple of the OS VPN preferences
//! API as futures, so callers can sequence the steps with `.await` instead of nesting completion
//! handlers.

use std::error::Error;

pub use ephemeral::InMemEphemeralProfiles;
pub use profile::{ProfileId, ProtocolConfiguration, TunnelProfile};

mod ephemeral;
mod profile;

pub trait ProfileStore {
    type StorageError: Error + Send + Sync + 'static;

    /// Returns every stored profile, in enumeration order.
    #[allow(async_fn_in_trait)]
    async fn load_all(&self) -> Result<Vec<TunnelProfile>, Self::StorageError>;

    /// Returns the persisted state of the given profile. A profile that was never saved loads as
    /// itself.
    #[allow(async_fn_in_trait)]
    async fn load(&self, profile: &TunnelProfile) -> Result<TunnelProfile, Self::StorageError>;

    /// Inserts or replaces the profile with the same id.
    #[allow(async_fn_in_trait)]
    async fn save(&self, profile: &TunnelProfile) -> Result<(), Self::StorageError>;
}

// Helper functions for error wrapping

#[derive(Debug, thiserror::Error)]
pub enum ProfileStoreError {
    #[error("failed to load profiles: {source}")]
    FailedToLoadProfiles {
        source: Box<dyn Error + Send + Sync + 'static>,
    },

    #[error("failed to load profile {id}: {source}")]
    FailedToLoadProfile {
        id: ProfileId,
        source: Box<dyn Error + Send + Sync + 'static>,
    },

    #[error("failed to save profile {id}: {source}")]
    FailedToSaveProfile {
        id: ProfileId,
        source: Box<dyn Error + Send + Sync + 'static>,
    },
}

pub async fn load_all_profiles<S>(store: &S) -> Result<Vec<TunnelProfile>, ProfileStoreError>
where
    S: ProfileStore,
{
    store
        .load_all()
        .await
        .map_err(|err| ProfileStoreError::FailedToLoadProfiles {
            source: Box::new(err),
        })
}

pub async fn load_profile<S>(
    profile: &TunnelProfile,
    store: &S,
) -> Result<TunnelProfile, ProfileStoreError>
where
    S: ProfileStore,
{
    store
        .load(profile)
        .await
        .map_err(|err| ProfileStoreError::FailedToLoadProfile {
            id: profile.id,
            source: Box::new(err),
        })
}

pub async fn save_profile<S>(profile: &TunnelProfile, store: &S) -> Result<(), ProfileStoreError>
where
    S: ProfileStore,
{
    store
        .save(profile)
        .await
        .map_err(|err| ProfileStoreError::FailedToSaveProfile {
            id: profile.id,
            source: Box::new(err),
        })
}

/// Inserts `profile` into `profiles`, replacing the entry with the same id in place or appending
/// it when it is new.
pub(crate) fn upsert(profiles: &mut Vec<TunnelProfile>, profile: &TunnelProfile) {
    match profiles.iter_mut().find(|p| p.id == profile.id) {
        Some(existing) => *existing = profile.clone(),
        None => profiles.push(profile.clone()),
    }
}
