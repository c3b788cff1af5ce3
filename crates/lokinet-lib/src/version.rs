// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

/// Release version shared by every frontend.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const COMMIT_SHA: Option<&str> = option_env!("VERGEN_GIT_SHA");
const BUILD_TIMESTAMP: Option<&str> = option_env!("VERGEN_BUILD_TIMESTAMP");
const RELEASE_CODENAME: Option<&str> = option_env!("LOKINET_RELEASE_CODENAME");

const SHORT_SHA_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub informational_version: String,
    pub commit_sha: Option<String>,
    pub build_timestamp: Option<String>,
    pub debug_build: bool,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION.to_owned(),
            informational_version: informational_version(),
            commit_sha: commit_sha().map(str::to_owned),
            build_timestamp: BUILD_TIMESTAMP.map(str::to_owned),
            debug_build: cfg!(debug_assertions),
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20}{}", "Version:", self.informational_version)?;
        if let Some(ref sha) = self.commit_sha {
            writeln!(f, "{:<20}{}", "Commit SHA:", sha)?;
        }
        if let Some(ref timestamp) = self.build_timestamp {
            writeln!(f, "{:<20}{}", "Build Timestamp:", timestamp)?;
        }
        write!(
            f,
            "{:<20}{}",
            "Build Profile:",
            if self.debug_build { "debug" } else { "release" }
        )
    }
}

/// Git commit the build was made from, when it was available at build time.
pub fn commit_sha() -> Option<&'static str> {
    COMMIT_SHA.filter(|sha| is_commit_sha(sha))
}

/// `0.4.3-dev-<short sha>` for debug builds, `0.4.3 (<codename>)` for release builds.
pub fn informational_version() -> String {
    format_informational_version(
        VERSION,
        commit_sha(),
        RELEASE_CODENAME,
        cfg!(debug_assertions),
    )
}

fn format_informational_version(
    version: &str,
    sha: Option<&str>,
    codename: Option<&str>,
    debug_build: bool,
) -> String {
    if debug_build {
        match sha.filter(|sha| is_commit_sha(sha)) {
            Some(sha) => format!("{version}-dev-{}", &sha[..SHORT_SHA_LEN]),
            None => format!("{version}-dev"),
        }
    } else {
        match codename {
            Some(codename) if !codename.is_empty() => format!("{version} ({codename})"),
            _ => version.to_owned(),
        }
    }
}

// vergen emits a placeholder instead of failing when git is unavailable.
fn is_commit_sha(sha: &str) -> bool {
    sha.len() >= SHORT_SHA_LEN && sha.chars().all(|c| c.is_ascii_hexdigit())
}
