// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session-level configuration via `inferlib.yaml`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::error::{InferError, Result};
use crate::core::fused::FusedFuncManager;
use crate::core::providers::{
    CpuExecutionProvider, CpuProviderConfig, ExecutionProviders, CPU_EXECUTION_PROVIDER,
};

/// A fused function served from an external kernel library.
#[derive(Debug, Clone, Deserialize)]
pub struct FusedFunctionConfig {
    pub name: String,
    /// Library path. Relative paths resolve against the config file's directory.
    pub library: PathBuf,
}

/// Session configuration from `inferlib.yaml`.
#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Settings of the built-in CPU provider.
    #[serde(default)]
    pub cpu: CpuProviderConfig,

    #[serde(default)]
    pub fused_functions: Vec<FusedFunctionConfig>,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "inferlib.yaml";

    /// Load configuration from a directory. Returns error if the file is
    /// missing or cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            InferError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let mut config = Self::from_yaml_str(&content).map_err(|e| {
            InferError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
        config.base_dir = Some(dir.to_path_buf());

        tracing::info!("Loaded session config from {}", config_path.display());
        Ok(config)
    }

    /// Parse configuration text. Relative library paths stay relative to the
    /// working directory.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| InferError::Configuration(e.to_string()))
    }

    /// Resolved library path of `function`.
    pub fn library_path(&self, function: &FusedFunctionConfig) -> PathBuf {
        match &self.base_dir {
            Some(base) if function.library.is_relative() => base.join(&function.library),
            _ => function.library.clone(),
        }
    }

    /// Register every configured fused function with `manager`.
    ///
    /// Names are checked against the manager and each other first, so either
    /// all functions are registered or none are.
    pub fn register_fused_functions(&self, manager: &mut FusedFuncManager) -> Result<usize> {
        let mut seen = BTreeSet::new();
        for function in &self.fused_functions {
            if manager.contains(&function.name) || !seen.insert(function.name.as_str()) {
                let err = InferError::FuncAlreadyExists(function.name.clone());
                tracing::error!("{}", err);
                return Err(err);
            }
        }

        for function in &self.fused_functions {
            manager.add_func_info_from_library(function.name.clone(), self.library_path(function))?;
        }
        Ok(self.fused_functions.len())
    }

    /// Register the built-in CPU provider with the configured settings.
    pub fn register_providers(&self, providers: &mut ExecutionProviders) -> Result<()> {
        providers.add(
            CPU_EXECUTION_PROVIDER,
            Box::new(CpuExecutionProvider::new(self.cpu.clone())),
        )
    }
}
