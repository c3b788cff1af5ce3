// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::convert::Infallible;

use tokio::sync::Mutex;

use crate::{upsert, ProfileStore, TunnelProfile};

#[derive(Default)]
pub struct InMemEphemeralProfiles {
    profiles: Mutex<Vec<TunnelProfile>>,
}

impl InMemEphemeralProfiles {
    pub fn with_profiles(profiles: Vec<TunnelProfile>) -> Self {
        Self {
            profiles: Mutex::new(profiles),
        }
    }

    pub async fn profiles(&self) -> Vec<TunnelProfile> {
        self.profiles.lock().await.clone()
    }
}

impl ProfileStore for InMemEphemeralProfiles {
    type StorageError = Infallible;

    async fn load_all(&self) -> Result<Vec<TunnelProfile>, Self::StorageError> {
        Ok(self.profiles.lock().await.clone())
    }

    async fn load(&self, profile: &TunnelProfile) -> Result<TunnelProfile, Self::StorageError> {
        Ok(self
            .profiles
            .lock()
            .await
            .iter()
            .find(|p| p.id == profile.id)
            .cloned()
            .unwrap_or_else(|| profile.clone()))
    }

    async fn save(&self, profile: &TunnelProfile) -> Result<(), Self::StorageError> {
        upsert(&mut *self.profiles.lock().await, profile);
        Ok(())
    }
}
