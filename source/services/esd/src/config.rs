// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! TOML configuration of the IOS driver.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`IosConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File that failed, `<inline>` for string input.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// `[ios]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IosSection {
    /// IOS version the kernel boots with.
    pub version: u32,
    /// Whether continuations are deferred on the timeline.
    pub core_running: bool,
}

impl Default for IosSection {
    fn default() -> Self {
        Self { version: 58, core_running: true }
    }
}

/// `[fs]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsSection {
    /// When false only the fixed IPC overhead is charged.
    pub simulate_timing: bool,
}

impl Default for FsSection {
    fn default() -> Self {
        Self { simulate_timing: true }
    }
}

/// Driver configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IosConfig {
    /// Kernel settings.
    pub ios: IosSection,
    /// File system settings.
    pub fs: FsSection,
}

impl IosConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { path: PathBuf::from("<inline>"), source })
    }

    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}
