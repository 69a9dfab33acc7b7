//! Custom command build backend.
//!
//! The first arg is the executable; remaining args get placeholder
//! substitution before the command runs. The command must leave a file at
//! the destination path.

use anyhow::Result;
use std::path::Path;
use std::process::Command;

use super::{require_output, run_build_command};
use crate::error::StageError;
use crate::manifest::BuildSpec;
use crate::platform::Platform;

pub fn compile(build: &BuildSpec, source_dir: &Path, platform: &Platform, dest: &Path) -> Result<()> {
    let Some((program, rest)) = build.args.split_first() else {
        return Err(StageError::BadInput(
            "custom build requires at least one arg (the executable)".into(),
        )
        .into());
    };

    let mut cmd = Command::new(program);
    for arg in rest {
        cmd.arg(substitute_placeholders(arg, platform, dest));
    }
    cmd.current_dir(source_dir);
    cmd.env("OUTPUT_PATH", dest);
    cmd.env("GOOS", &platform.goos);
    cmd.env("GOARCH", &platform.goarch);
    cmd.envs(&build.env);

    run_build_command(cmd, &format!("custom build '{program}'"))?;
    require_output(dest)
}

/// Replace `{{platform}}`, `{{goos}}`, `{{goarch}}`, `{{output}}`, and
/// `{{ext}}` in a command argument.
fn substitute_placeholders(arg: &str, platform: &Platform, dest: &Path) -> String {
    let ext = if platform.is_windows() { ".exe" } else { "" };
    arg.replace("{{platform}}", &platform.key())
        .replace("{{goos}}", &platform.goos)
        .replace("{{goarch}}", &platform.goarch)
        .replace("{{output}}", &dest.to_string_lossy())
        .replace("{{ext}}", ext)
}
