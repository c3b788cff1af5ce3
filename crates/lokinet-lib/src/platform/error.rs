// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use crate::{bootstrap::BootstrapError, config::ConfigSetupError, tcp_tunnel::TunnelError};

#[derive(thiserror::Error, uniffi::Error, Debug, Clone, PartialEq)]
pub enum VpnError {
    #[error("{details}")]
    InternalError { details: String },

    #[error("{details}")]
    StorageError { details: String },

    #[error("{details}")]
    EngineError { details: String },

    #[error("{details}")]
    TunnelError { details: String },

    #[error("{details}")]
    InvalidStateError { details: String },
}

impl From<crate::Error> for VpnError {
    fn from(value: crate::Error) -> Self {
        match value {
            crate::Error::Bootstrap(err) => err.into(),
            crate::Error::Tunnel(err) => err.into(),
            crate::Error::Config(err) => err.into(),
            err @ crate::Error::DuplicateProfiles { .. } => Self::StorageError {
                details: err.to_string(),
            },
        }
    }
}

impl From<BootstrapError> for VpnError {
    fn from(value: BootstrapError) -> Self {
        Self::EngineError {
            details: error_chain(&value),
        }
    }
}

impl From<lokinet_engine::Error> for VpnError {
    fn from(value: lokinet_engine::Error) -> Self {
        Self::EngineError {
            details: error_chain(&value),
        }
    }
}

impl From<TunnelError> for VpnError {
    fn from(value: TunnelError) -> Self {
        match value {
            TunnelError::AlreadyOpen => Self::InvalidStateError {
                details: value.to_string(),
            },
            err => Self::TunnelError {
                details: error_chain(&err),
            },
        }
    }
}

impl From<ConfigSetupError> for VpnError {
    fn from(value: ConfigSetupError) -> Self {
        Self::InternalError {
            details: value.to_string(),
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for VpnError {
    fn from(value: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::InternalError {
            details: value.reason,
        }
    }
}

// The host only sees the message, so include the underlying causes.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut details = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        details.push_str(": ");
        details.push_str(&cause.to_string());
        source = cause.source();
    }
    details
}
