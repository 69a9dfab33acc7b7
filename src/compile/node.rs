//! npm/node build backend.
//!
//! Runs `npm install` and then the configured build command (default
//! `npm run build`). The bundler config is responsible for writing its
//! output to the destination path — `TARGET_OS`, `TARGET_ARCH`, and
//! `OUTPUT_PATH` are exported so build scripts can wire that up.

use anyhow::Result;
use std::path::Path;
use std::process::Command;

use super::{find_tool, require_output, run_build_command};
use crate::manifest::BuildSpec;
use crate::platform::Platform;

pub fn compile(build: &BuildSpec, source_dir: &Path, platform: &Platform, dest: &Path) -> Result<()> {
    let npm = find_tool("npm")?;

    let mut install = Command::new(&npm);
    install.arg("install");
    install.current_dir(source_dir);
    install.envs(&build.env);
    run_build_command(install, &format!("npm install in '{}'", source_dir.display()))?;

    let mut cmd = if build.args.is_empty() {
        let mut default_build = Command::new(&npm);
        default_build.args(["run", "build"]);
        default_build
    } else {
        let mut configured = Command::new(&build.args[0]);
        configured.args(&build.args[1..]);
        configured
    };
    cmd.current_dir(source_dir);
    cmd.env("TARGET_OS", &platform.goos);
    cmd.env("TARGET_ARCH", &platform.goarch);
    cmd.env("OUTPUT_PATH", dest);
    cmd.envs(&build.env);

    run_build_command(cmd, &format!("npm build in '{}'", source_dir.display()))?;
    require_output(dest)
}
