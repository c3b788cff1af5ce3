// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::{collections::BTreeMap, fmt, str::FromStr};

use uuid::Uuid;

/// Identity of a stored profile record. Several records may point at the same provider bundle, but
/// each one has its own id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProfileId(Uuid);

impl ProfileId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProfileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Provider specific part of a profile. Opaque to everything except the tunnel extension itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProtocolConfiguration {
    /// Bundle identifier of the packet tunnel extension handling the traffic. `None` for profiles
    /// that are not tunnel-provider profiles.
    pub provider_bundle_identifier: Option<String>,
    pub server_address: Option<String>,
    pub provider_configuration: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelProfile {
    pub id: ProfileId,
    pub localized_description: String,
    pub enabled: bool,
    pub protocol: ProtocolConfiguration,
}

impl TunnelProfile {
    /// A fresh, disabled and unnamed profile for the given provider bundle.
    pub fn new(provider_bundle_identifier: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new_random(),
            localized_description: String::new(),
            enabled: false,
            protocol: ProtocolConfiguration {
                provider_bundle_identifier: Some(provider_bundle_identifier.into()),
                ..Default::default()
            },
        }
    }

    pub fn provider_bundle_identifier(&self) -> Option<&str> {
        self.protocol.provider_bundle_identifier.as_deref()
    }
}

impl fmt::Display for TunnelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, provider: {}, enabled: {})",
            self.localized_description,
            self.id,
            self.provider_bundle_identifier().unwrap_or("none"),
            self.enabled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_profile_is_disabled_and_unnamed() {
        let profile = TunnelProfile::new("org.lokinet.NetworkExtension");
        assert!(!profile.enabled);
        assert!(profile.localized_description.is_empty());
        assert_eq!(
            profile.provider_bundle_identifier(),
            Some("org.lokinet.NetworkExtension")
        );
    }

    #[test]
    fn new_profiles_get_distinct_ids() {
        let a = TunnelProfile::new("org.lokinet.NetworkExtension");
        let b = TunnelProfile::new("org.lokinet.NetworkExtension");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn profile_id_parses_from_its_display_form() {
        let id = ProfileId::new_random();
        assert_eq!(id.to_string().parse::<ProfileId>().unwrap(), id);
        assert!("not-a-uuid".parse::<ProfileId>().is_err());
    }
}
