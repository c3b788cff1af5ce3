// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::{collections::HashMap, path::PathBuf, str::FromStr};

use lokinet_profile_store::{ProfileId, ProtocolConfiguration, TunnelProfile};

use crate::{
    platform::error::VpnError,
    profile_manager::{ProfileManagerState, ProfileOrigin, ProfilePass},
    tcp_tunnel::{ConnectionState, TunnelEvent},
    version::VersionInfo,
    UniffiCustomTypeConverter,
};

uniffi::custom_type!(PathBuf, String);

impl UniffiCustomTypeConverter for PathBuf {
    type Builtin = String;

    fn into_custom(val: Self::Builtin) -> uniffi::Result<Self> {
        Ok(PathBuf::from_str(&val)?)
    }

    fn from_custom(obj: Self) -> Self::Builtin {
        obj.display().to_string()
    }
}

/// A VPN tunnel profile as stored by the host OS.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct TunnelProfileRecord {
    pub id: String,
    pub localized_description: String,
    pub enabled: bool,
    pub provider_bundle_identifier: Option<String>,
    pub server_address: Option<String>,
    pub provider_configuration: HashMap<String, String>,
}

impl From<TunnelProfile> for TunnelProfileRecord {
    fn from(value: TunnelProfile) -> Self {
        Self {
            id: value.id.to_string(),
            localized_description: value.localized_description,
            enabled: value.enabled,
            provider_bundle_identifier: value.protocol.provider_bundle_identifier,
            server_address: value.protocol.server_address,
            provider_configuration: value.protocol.provider_configuration.into_iter().collect(),
        }
    }
}

impl TryFrom<TunnelProfileRecord> for TunnelProfile {
    type Error = VpnError;

    fn try_from(value: TunnelProfileRecord) -> Result<Self, Self::Error> {
        let id = ProfileId::from_str(&value.id).map_err(|err| VpnError::StorageError {
            details: format!("invalid profile id {}: {err}", value.id),
        })?;
        Ok(Self {
            id,
            localized_description: value.localized_description,
            enabled: value.enabled,
            protocol: ProtocolConfiguration {
                provider_bundle_identifier: value.provider_bundle_identifier,
                server_address: value.server_address,
                provider_configuration: value.provider_configuration.into_iter().collect(),
            },
        })
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileManagerStep {
    Uninitialized,
    CandidateSelected,
    NoCandidate,
    Loaded,
    Enabled,
}

impl From<ProfileManagerState> for ProfileManagerStep {
    fn from(value: ProfileManagerState) -> Self {
        match value {
            ProfileManagerState::Uninitialized => Self::Uninitialized,
            ProfileManagerState::CandidateSelected => Self::CandidateSelected,
            ProfileManagerState::NoCandidate => Self::NoCandidate,
            ProfileManagerState::Loaded => Self::Loaded,
            ProfileManagerState::Enabled => Self::Enabled,
        }
    }
}

/// Result of enabling the tunnel profile.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ProfilePassSummary {
    pub profile: TunnelProfileRecord,
    /// True when no stored profile matched and a new one was created.
    pub created: bool,
    pub persisted: bool,
    pub steps: Vec<ProfileManagerStep>,
    pub warnings: Vec<String>,
}

impl From<ProfilePass> for ProfilePassSummary {
    fn from(value: ProfilePass) -> Self {
        Self {
            profile: value.profile.into(),
            created: value.origin == ProfileOrigin::Created,
            persisted: value.persisted,
            steps: value.history.into_iter().map(Into::into).collect(),
            warnings: value
                .warnings
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelConnectionState {
    Invalid,
    Connecting,
    Waiting,
    Connected,
    Disconnected,
    Cancelled,
}

impl From<ConnectionState> for TunnelConnectionState {
    fn from(value: ConnectionState) -> Self {
        match value {
            ConnectionState::Invalid => Self::Invalid,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Waiting => Self::Waiting,
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum TunnelStatusEvent {
    StateChanged { state: TunnelConnectionState },
    Data { data: Vec<u8> },
    ReadStopped { error: Option<String> },
    Closed,
}

impl From<TunnelEvent> for TunnelStatusEvent {
    fn from(value: TunnelEvent) -> Self {
        match value {
            TunnelEvent::StateChanged(state) => Self::StateChanged {
                state: state.into(),
            },
            TunnelEvent::Data(data) => Self::Data {
                data: data.to_vec(),
            },
            TunnelEvent::ReadStopped(error) => Self::ReadStopped {
                error: error.map(|error| error.to_string()),
            },
            TunnelEvent::Closed => Self::Closed,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub informational_version: String,
    pub commit_sha: Option<String>,
    pub build_timestamp: Option<String>,
    pub debug_build: bool,
}

impl From<VersionInfo> for BuildInfo {
    fn from(value: VersionInfo) -> Self {
        Self {
            version: value.version,
            informational_version: value.informational_version,
            commit_sha: value.commit_sha,
            build_timestamp: value.build_timestamp,
            debug_build: value.debug_build,
        }
    }
}
