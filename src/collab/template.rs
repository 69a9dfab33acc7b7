//! Electron template generator invocation.
//!
//! The scaffold generator is an external process: it reads a
//! `DesktopConfig` JSON file and produces an Electron project tree. This
//! module owns the config shape and the invocation, nothing else.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesktopConfig {
    pub app_name: String,
    pub app_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
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
}

/// Handle on the external generator executable.
pub struct TemplateGenerator {
    program: PathBuf,
}

impl TemplateGenerator {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Write the config to a temp file and run the generator against the
    /// output directory.
    pub fn generate(&self, config: &DesktopConfig, output_dir: &Path) -> Result<()> {
        let config_file = tempfile::Builder::new()
            .prefix("desktop-config-")
            .suffix(".json")
            .tempfile()
            .context("creating desktop config temp file")?;
        serde_json::to_writer_pretty(&config_file, config)
            .context("writing desktop config")?;

        let output = Command::new(&self.program)
            .arg("--config")
            .arg(config_file.path())
            .arg("--output")
            .arg(output_dir)
            .output()
            .with_context(|| {
                format!("running template generator '{}'", self.program.display())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "template generator failed with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_passes_config_and_output() {
        let temp = tempfile::TempDir::new().unwrap();

        // Stub generator copies the config into the output dir so the
        // test can verify both arguments arrived.
        let stub = temp.path().join("generator.sh");
        std::fs::write(
            &stub,
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  case $1 in\n    --config) CONFIG=$2; shift 2 ;;\n    --output) OUTPUT=$2; shift 2 ;;\n    *) shift ;;\n  esac\ndone\nmkdir -p \"$OUTPUT\"\ncp \"$CONFIG\" \"$OUTPUT/seen-config.json\"\n",
        )
        .unwrap();
        crate::paths::make_executable(&stub).unwrap();

        let output_dir = temp.path().join("scaffold");
        let generator = TemplateGenerator::new(stub);
        generator
            .generate(
                &DesktopConfig {
                    app_name: "Demo".into(),
                    app_id: "com.example.demo".into(),
                    ..Default::default()
                },
                &output_dir,
            )
            .unwrap();

        let seen: DesktopConfig = serde_json::from_slice(
            &std::fs::read(output_dir.join("seen-config.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(seen.app_name, "Demo");
    }

    #[test]
    fn generator_failure_carries_stderr() {
        let temp = tempfile::TempDir::new().unwrap();
        let stub = temp.path().join("broken.sh");
        std::fs::write(&stub, "#!/bin/sh\necho scaffold exploded >&2\nexit 2\n").unwrap();
        crate::paths::make_executable(&stub).unwrap();

        let generator = TemplateGenerator::new(stub);
        let err = generator
            .generate(&DesktopConfig::default(), temp.path())
            .unwrap_err();
        assert!(err.to_string().contains("scaffold exploded"));
    }
}
