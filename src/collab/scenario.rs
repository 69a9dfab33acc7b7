//! Scenario analyzer contract.
//!
//! Scenario metadata comes from an external analyzer that scrapes a
//! scenario directory (`service.json`, `package.json`). This module
//! defines only the exchange types and the trait the Electron config
//! seeding consumes — the scraping itself lives elsewhere.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub has_ui: bool,
    #[serde(default)]
    pub ui_dist_path: String,
    #[serde(default)]
    pub ui_port: u16,
    #[serde(default)]
    pub api_port: u16,
    #[serde(default)]
    pub scenario_path: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Supplier of scenario metadata for a scenario directory.
pub trait ScenarioAnalyzer {
    fn analyze(&self, scenario_dir: &Path) -> Result<ScenarioMetadata>;
}

/// Seed an Electron desktop config from analyzed metadata.
pub fn seed_desktop_config(metadata: &ScenarioMetadata) -> super::template::DesktopConfig {
    super::template::DesktopConfig {
        app_name: if metadata.display_name.is_empty() {
            metadata.name.clone()
        } else {
            metadata.display_name.clone()
        },
        app_id: if metadata.app_id.is_empty() {
            format!("com.vrooli.{}", metadata.name)
        } else {
            metadata.app_id.clone()
        },
        version: metadata.version.clone(),
        description: metadata.description.clone(),
        author: metadata.author.clone(),
        license: metadata.license.clone(),
        has_ui: metadata.has_ui,
        ui_dist_path: metadata.ui_dist_path.clone(),
        ui_port: metadata.ui_port,
        api_port: metadata.api_port,
        scenario_path: metadata.scenario_path.clone(),
    }
}
