//! SDK Module Descriptor
//!
//! Declares the SDK module to a host build orchestrator: its name, the
//! subsystems it links against, and its precompiled-header mode.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

/// Name of the SDK module.
pub const MODULE_NAME: &str = "MultiplayGameServerSDK";

/// Modules whose interfaces are re-exposed to consumers of the SDK.
///
/// Order matters: this is also the order in which `startup` loads them.
pub const PUBLIC_DEPENDENCIES: [&str; 7] = [
    "Core",
    "Http",
    "Json",
    "JsonUtilities",
    "Networking",
    "Sockets",
    "WebSockets",
];

/// Modules used internally and not re-exposed.
pub const PRIVATE_DEPENDENCIES: [&str; 2] = ["CoreUObject", "Engine"];

/// Platform a module is being configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlatform {
    /// Windows (home directory from HOMEDRIVE + HOMEPATH).
    Windows,
    /// Linux (home directory from HOME).
    Linux,
    /// macOS.
    Mac,
    /// Anything else.
    Other,
}

impl TargetPlatform {
    /// Platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            TargetPlatform::Windows
        } else if cfg!(target_os = "linux") {
            TargetPlatform::Linux
        } else if cfg!(target_os = "macos") {
            TargetPlatform::Mac
        } else {
            TargetPlatform::Other
        }
    }
}

/// Target configuration supplied by the host build tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    /// Platform being built.
    pub platform: TargetPlatform,
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self {
            platform: TargetPlatform::current(),
        }
    }
}

/// Precompiled-header usage mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PchUsageMode {
    /// Use the shared PCH unless the module provides its own.
    ExplicitOrShared,
    /// Use the module's own PCH only.
    NoShared,
    /// Disable precompiled headers.
    NoPch,
}

/// Descriptor errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModuleError {
    /// A module appears in both the public and private sets.
    #[error("module {0} is declared as both a public and a private dependency")]
    OverlappingDependency(String),
}

/// Build descriptor for the SDK module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Module name.
    pub name: &'static str,
    /// Target the descriptor was produced for.
    pub target: TargetInfo,
    /// Public dependency names.
    pub public_dependencies: BTreeSet<&'static str>,
    /// Private dependency names.
    pub private_dependencies: BTreeSet<&'static str>,
    /// Precompiled-header mode.
    pub pch_usage: PchUsageMode,
}

impl ModuleDescriptor {
    /// Register the SDK's dependencies for a target.
    ///
    /// The dependency sets are identical for every platform.
    pub fn for_target(target: TargetInfo) -> Self {
        Self {
            name: MODULE_NAME,
            target,
            public_dependencies: PUBLIC_DEPENDENCIES.into_iter().collect(),
            private_dependencies: PRIVATE_DEPENDENCIES.into_iter().collect(),
            pch_usage: PchUsageMode::ExplicitOrShared,
        }
    }

    /// Check that no module is both public and private.
    pub fn validate(&self) -> Result<(), ModuleError> {
        match self
            .public_dependencies
            .intersection(&self.private_dependencies)
            .next()
        {
            Some(name) => Err(ModuleError::OverlappingDependency(name.to_string())),
            None => Ok(()),
        }
    }

    /// Module startup: load each public dependency in declaration order.
    ///
    /// Returns the names in the order they were loaded.
    pub fn startup(&self) -> Vec<&'static str> {
        let loaded: Vec<&'static str> = PUBLIC_DEPENDENCIES
            .into_iter()
            .filter(|name| self.public_dependencies.contains(name))
            .collect();

        for name in &loaded {
            info!("{}: loaded module {}", self.name, name);
        }

        loaded
    }
}

impl Default for ModuleDescriptor {
    fn default() -> Self {
        Self::for_target(TargetInfo::default())
    }
}
