//! Bundle manifest model and loading.
//!
//! The manifest (`bundle.json`) is authored by an external tool and owned
//! by the caller; this crate reads it, validates the parts packaging and
//! preflight depend on, and treats everything else as opaque. Unknown
//! fields are tolerated on purpose — the authoring tool adds fields over
//! time and old bundles must keep loading.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::StageError;
use crate::platform::{alias_platform_key, expand_shorthand_platform};

/// Top-level bundle manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub target: String,
    #[serde(default)]
    pub app: AppInfo,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub secrets: Vec<SecretSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub id: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub binaries: BTreeMap<String, BinarySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortsSpec>,
    #[serde(default)]
    pub log_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySpec {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(rename = "type")]
    pub build_type: String,
    #[serde(default)]
    pub source_dir: String,
    #[serde(default)]
    pub entry_point: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortsSpec {
    #[serde(default)]
    pub requested: Vec<PortRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSpec {
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub http_path: Option<String>,
    #[serde(default)]
    pub tcp_port_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_ipc_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub auth_token_path: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            host: default_ipc_host(),
            port: 0,
            auth_token_path: String::new(),
        }
    }
}

fn default_ipc_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSpec {
    pub id: String,
    #[serde(default)]
    pub required: bool,
}

impl Manifest {
    /// Load and validate a manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("reading bundle manifest '{}'", path.display()))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing bundle manifest '{}'", path.display()))?;
        manifest
            .validate()
            .with_context(|| format!("validating bundle manifest '{}'", path.display()))?;
        Ok(manifest)
    }

    /// Structural validation at ingress.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version.trim().is_empty() {
            bail!(StageError::BadInput("manifest schema_version is empty".into()));
        }
        if self.target != "desktop" {
            bail!(StageError::BadInput(format!(
                "manifest target is '{}', expected 'desktop'",
                self.target
            )));
        }
        if self.services.is_empty() {
            bail!(StageError::BadInput(
                "manifest declares no services".into()
            ));
        }
        let mut seen = BTreeSet::new();
        for service in &self.services {
            if service.id.trim().is_empty() {
                bail!(StageError::BadInput("service with empty id".into()));
            }
            if !seen.insert(service.id.as_str()) {
                bail!(StageError::BadInput(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
        }
        Ok(())
    }

    /// Union of canonical platform keys declared across service binaries.
    pub fn declared_platforms(&self) -> Vec<String> {
        let mut keys = BTreeSet::new();
        for service in &self.services {
            for key in service.binaries.keys() {
                if let Ok(platform) = crate::platform::parse_platform_key(key) {
                    keys.insert(platform.key());
                }
            }
        }
        keys.into_iter().collect()
    }

    pub fn service(&self, id: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Longest declared readiness timeout, in milliseconds.
    pub fn max_readiness_timeout_ms(&self) -> u64 {
        self.services
            .iter()
            .filter_map(|s| s.readiness.as_ref())
            .map(|r| r.timeout_ms)
            .max()
            .unwrap_or(0)
    }
}

impl ServiceSpec {
    /// Look up the declared binary for a platform.
    ///
    /// Search order: exact key, aliased key, shorthand-expanded candidates
    /// (and their aliases). Returns the matching manifest key alongside
    /// the spec so callers can patch the entry they resolved.
    pub fn binary_for_platform(&self, platform: &str) -> Option<(&str, &BinarySpec)> {
        if let Some((key, spec)) = self.binaries.get_key_value(platform) {
            return Some((key.as_str(), spec));
        }
        if let Some(alias) = alias_platform_key(platform) {
            if let Some((key, spec)) = self.binaries.get_key_value(&alias) {
                return Some((key.as_str(), spec));
            }
        }
        for candidate in expand_shorthand_platform(platform) {
            if let Some((key, spec)) = self.binaries.get_key_value(&candidate) {
                return Some((key.as_str(), spec));
            }
            if let Some(alias) = alias_platform_key(&candidate) {
                if let Some((key, spec)) = self.binaries.get_key_value(&alias) {
                    return Some((key.as_str(), spec));
                }
            }
        }
        None
    }
}
