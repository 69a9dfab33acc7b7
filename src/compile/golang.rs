//! Go build backend.
//!
//! Cross-compilation is the Go toolchain's native mode: `CGO_ENABLED=0`
//! plus `GOOS`/`GOARCH` and the binary lands wherever `-o` points.

use anyhow::Result;
use std::path::Path;
use std::process::Command;

use super::{find_tool, require_output, run_build_command};
use crate::manifest::BuildSpec;
use crate::platform::Platform;

pub fn compile(build: &BuildSpec, source_dir: &Path, platform: &Platform, dest: &Path) -> Result<()> {
    let go = find_tool("go")?;

    let mut cmd = Command::new(go);
    cmd.arg("build");
    cmd.args(&build.args);
    cmd.arg("-o").arg(dest);
    if build.entry_point.is_empty() {
        cmd.arg(".");
    } else {
        cmd.arg(&build.entry_point);
    }
    cmd.current_dir(source_dir);
    cmd.env("CGO_ENABLED", "0");
    cmd.env("GOOS", &platform.goos);
    cmd.env("GOARCH", &platform.goarch);
    cmd.envs(&build.env);

    run_build_command(cmd, &format!("go build in '{}'", source_dir.display()))?;
    require_output(dest)
}
