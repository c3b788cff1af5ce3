// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    bootstrap::BUNDLED_CONFIG_FILE,
    profile_manager::{
        DuplicateProfilePolicy, DEFAULT_PROFILE_NAME, DEFAULT_PROVIDER_BUNDLE_IDENTIFIER,
    },
    tcp_tunnel::TunnelConnectionConfig,
};

pub const DEFAULT_CONFIG_FILE: &str = "lokinet-glue.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigSetupError {
    #[error("failed to parse config file {file}: {error}")]
    Parse {
        file: PathBuf,
        error: Box<toml::de::Error>,
    },

    #[error("failed to serialize config for {file}: {error}")]
    Serialize {
        file: PathBuf,
        error: toml::ser::Error,
    },

    #[error("failed to read config file {file}: {error}")]
    ReadConfig {
        file: PathBuf,
        error: std::io::Error,
    },

    #[error("failed to get parent directory of {file}")]
    GetParentDirectory { file: PathBuf },

    #[error("failed to create directory {dir}: {error}")]
    CreateDirectory { dir: PathBuf, error: std::io::Error },

    #[error("failed to write file {file}: {error}")]
    WriteFile {
        file: PathBuf,
        error: std::io::Error,
    },
}

/// Settings for the frontends' glue layer. Every field falls back to its default when missing
/// from the file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LokinetConfig {
    pub profile: ProfileSettings,
    pub tunnel: TunnelConnectionConfig,
    pub engine: EngineSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    pub provider_bundle_identifier: String,
    pub display_name: String,
    pub duplicate_policy: DuplicateProfilePolicy,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            provider_bundle_identifier: DEFAULT_PROVIDER_BUNDLE_IDENTIFIER.to_owned(),
            display_name: DEFAULT_PROFILE_NAME.to_owned(),
            duplicate_policy: DuplicateProfilePolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Explicit location of liblokinet. The platform search path is used when unset.
    pub library_path: Option<PathBuf>,
    /// Name of the engine config file inside the app bundle.
    pub bundled_config_file: String,
    pub overwrite_config: bool,
    pub as_router: bool,
    pub multithreaded: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            library_path: None,
            bundled_config_file: BUNDLED_CONFIG_FILE.to_owned(),
            overwrite_config: true,
            as_router: false,
            multithreaded: false,
        }
    }
}

impl fmt::Display for LokinetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "profile: {} ({}), tunnel: {}:{}",
            self.profile.display_name,
            self.profile.provider_bundle_identifier,
            self.tunnel.address,
            self.tunnel.port
        )
    }
}

impl LokinetConfig {
    /// Reads the config at `path`, writing the defaults there first if the file does not exist.
    pub fn read_or_create(path: &Path) -> Result<Self, ConfigSetupError> {
        create_config_file(path, &LokinetConfig::default())?;
        read_config_file(path)
    }
}

// Create the TOML representation of the provided config, only if it doesn't already exists
pub fn create_config_file<C>(file_path: &Path, config: &C) -> Result<(), ConfigSetupError>
where
    C: Serialize,
{
    let config_str = toml::to_string(config).map_err(|error| ConfigSetupError::Serialize {
        file: file_path.to_path_buf(),
        error,
    })?;

    let config_dir = file_path
        .parent()
        .ok_or_else(|| ConfigSetupError::GetParentDirectory {
            file: file_path.to_path_buf(),
        })?;
    fs::create_dir_all(config_dir).map_err(|error| ConfigSetupError::CreateDirectory {
        dir: config_dir.to_path_buf(),
        error,
    })?;

    if !file_path.exists() {
        fs::write(file_path, config_str).map_err(|error| ConfigSetupError::WriteFile {
            file: file_path.to_path_buf(),
            error,
        })?;
        tracing::info!("Config file created at {}", file_path.display());
    }
    Ok(())
}

pub fn read_config_file<C>(file_path: &Path) -> Result<C, ConfigSetupError>
where
    C: DeserializeOwned,
{
    let file_content =
        fs::read_to_string(file_path).map_err(|error| ConfigSetupError::ReadConfig {
            file: file_path.to_path_buf(),
            error,
        })?;
    toml::from_str(&file_content).map_err(|error| ConfigSetupError::Parse {
        file: file_path.to_path_buf(),
        error: Box::new(error),
    })
}

pub fn write_config_file<C>(file_path: &Path, config: &C) -> Result<(), ConfigSetupError>
where
    C: Serialize,
{
    let config_str = toml::to_string(config).map_err(|error| ConfigSetupError::Serialize {
        file: file_path.to_path_buf(),
        error,
    })?;
    fs::write(file_path, config_str).map_err(|error| ConfigSetupError::WriteFile {
        file: file_path.to_path_buf(),
        error,
    })?;
    tracing::info!("Config file updated at {}", file_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_lokinet_extension() {
        let config = LokinetConfig::default();
        assert_eq!(
            config.profile.provider_bundle_identifier,
            "org.lokinet.NetworkExtension"
        );
        assert_eq!(config.profile.display_name, "Lokinet");
        assert_eq!(
            config.profile.duplicate_policy,
            DuplicateProfilePolicy::LastWins
        );
        assert_eq!(config.engine.bundled_config_file, "liblokinet-configuration.ini");
        assert!(config.engine.overwrite_config);
        assert!(!config.engine.multithreaded);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: LokinetConfig = toml::from_str(
            r#"
            [profile]
            duplicate_policy = "reject"

            [tunnel]
            port = 1234
            "#,
        )
        .unwrap();

        assert_eq!(config.profile.duplicate_policy, DuplicateProfilePolicy::Reject);
        assert_eq!(config.profile.display_name, "Lokinet");
        assert_eq!(config.tunnel.port, 1234);
        assert_eq!(
            config.tunnel.address,
            TunnelConnectionConfig::default().address
        );
    }

    #[test]
    fn read_or_create_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);

        let created = LokinetConfig::read_or_create(&path).unwrap();
        assert_eq!(created, LokinetConfig::default());

        let mut changed = created.clone();
        changed.profile.display_name = "Lokinet (beta)".to_owned();
        write_config_file(&path, &changed).unwrap();

        assert_eq!(LokinetConfig::read_or_create(&path).unwrap(), changed);
    }

    #[test]
    fn broken_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "profile = [").unwrap();

        assert!(matches!(
            read_config_file::<LokinetConfig>(&path),
            Err(ConfigSetupError::Parse { .. })
        ));
    }
}
