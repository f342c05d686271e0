// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serve configuration loaded from a TOML file.
//!
//! The `[serve]` table carries the supervisor's own keys; the rest of the
//! document is retained so worker modules can read their own sections.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// The file this configuration was loaded from. Watched by the change
    /// detector when autoreload is enabled.
    pub conf: PathBuf,
    /// Restart the controller whenever a watched file changes.
    pub autoreload: bool,
    /// Which registered modules to serve, in order.
    pub modules: Vec<ModuleSelector>,
    /// Optional `host:port` for the TCP monitor.
    pub monitor: Option<String>,
    /// The full parsed document, for module sections.
    document: toml::Table,
}

/// One element of the `modules` list: `<module>` or
/// `<module>:<name1>,<name2>,...` selecting specific named workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSelector {
    pub module: String,
    pub names: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no modules configured")]
    NoModules,

    #[error("invalid module selector {0:?}")]
    BadSelector(String),

    #[error("invalid monitor address {0:?} (expected host:port)")]
    BadMonitorAddr(String),
}

/// Shape of the `[serve]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServeSection {
    #[serde(default)]
    autoreload: bool,
    #[serde(default)]
    modules: Vec<String>,
    #[serde(default)]
    monitor: Option<String>,
}

impl ServeConfig {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: toml::Table = text.parse().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let serve: ServeSection = match document.get("serve") {
            Some(value) => {
                value
                    .clone()
                    .try_into()
                    .map_err(|source| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?
            }
            None => ServeSection::default(),
        };

        if serve.modules.is_empty() {
            return Err(ConfigError::NoModules);
        }
        let modules = serve
            .modules
            .iter()
            .map(|descriptor| ModuleSelector::parse(descriptor))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(monitor) = &serve.monitor {
            validate_host_port(monitor)?;
        }

        Ok(Self {
            conf: path.to_path_buf(),
            autoreload: serve.autoreload,
            modules,
            monitor: serve.monitor,
            document,
        })
    }

    /// The `[<module>]` table, if the document has one.
    pub fn module_table(&self, module: &str) -> Option<&toml::Table> {
        self.document.get(module).and_then(|value| value.as_table())
    }
}

impl ModuleSelector {
    /// Parse a `modules` list element.
    pub fn parse(descriptor: &str) -> Result<Self, ConfigError> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(ConfigError::BadSelector(descriptor.to_string()));
        }
        match descriptor.split_once(':') {
            None => Ok(Self {
                module: descriptor.to_string(),
                names: None,
            }),
            Some((module, names)) => {
                let module = module.trim();
                let names: Vec<String> = names
                    .split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect();
                if module.is_empty() || names.is_empty() {
                    return Err(ConfigError::BadSelector(descriptor.to_string()));
                }
                Ok(Self {
                    module: module.to_string(),
                    names: Some(names),
                })
            }
        }
    }

    /// Whether a named worker is included by this selector.
    pub fn includes(&self, name: &str) -> bool {
        match &self.names {
            None => true,
            Some(names) => names.iter().any(|n| n == name),
        }
    }
}

fn validate_host_port(addr: &str) -> Result<(), ConfigError> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(ConfigError::BadMonitorAddr(addr.to_string()));
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::BadMonitorAddr(addr.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
