//! The `vrooli` CLI shim staged into `bundle/bin/`.
//!
//! A POSIX shell script that resolves the bundle root at runtime, derives
//! the app slug from `bundle.json`, picks up the IPC port and auth token
//! from the user config dir (manifest default as fallback), and execs the
//! bundled `runtimectl`. One convenience command (`scenario port`) is
//! translated locally; everything else passes through, exit codes
//! included.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::make_executable;

pub const SHIM_NAME: &str = "vrooli";

const SHIM_SCRIPT: &str = r#"#!/bin/sh
# vrooli - dispatch bundled CLI commands to runtimectl.
set -eu

SCRIPT_DIR=$(CDPATH= cd -- "$(dirname -- "$0")" && pwd)
BUNDLE_ROOT=$(CDPATH= cd -- "$SCRIPT_DIR/.." && pwd)
MANIFEST="$BUNDLE_ROOT/bundle.json"

if [ ! -f "$MANIFEST" ]; then
    echo "vrooli: bundle manifest not found at $MANIFEST" >&2
    exit 1
fi

APP_SLUG=$(python3 - "$MANIFEST" <<'PY'
import json, sys
manifest = json.load(open(sys.argv[1]))
app = manifest.get("app", {})
slug = app.get("id") or app.get("name") or "app"
print(slug.rsplit(".", 1)[-1].lower())
PY
)

DEFAULT_PORT=$(python3 - "$MANIFEST" <<'PY'
import json, sys
manifest = json.load(open(sys.argv[1]))
print(manifest.get("ipc", {}).get("port", 0))
PY
)

CONFIG_DIR="${XDG_CONFIG_HOME:-$HOME/.config}/$APP_SLUG"
TOKEN_FILE="$CONFIG_DIR/auth_token"
PORT="$DEFAULT_PORT"
if [ -f "$CONFIG_DIR/ipc_port" ]; then
    PORT=$(cat "$CONFIG_DIR/ipc_port")
fi

case "$(uname -s)" in
    Darwin) OS_KEY=mac ;;
    *) OS_KEY=linux ;;
esac
case "$(uname -m)" in
    arm64|aarch64) ARCH_KEY=aarch64 ;;
    *) ARCH_KEY=x64 ;;
esac
RUNTIMECTL="$BUNDLE_ROOT/runtime/$OS_KEY-$ARCH_KEY/runtimectl"

if [ ! -x "$RUNTIMECTL" ]; then
    echo "vrooli: runtimectl not found for $OS_KEY-$ARCH_KEY under $BUNDLE_ROOT/runtime" >&2
    exit 1
fi

# vrooli scenario port <scenario> <API_PORT|UI_PORT>
if [ "${1:-}" = "scenario" ] && [ "${2:-}" = "port" ] && [ $# -ge 4 ]; then
    SCENARIO="$3"
    ROLE="$4"
    case "$ROLE" in
        API_PORT) SERVICE_TYPE=api; PORT_NAME=api ;;
        UI_PORT) SERVICE_TYPE=ui; PORT_NAME=ui ;;
        *)
            echo "vrooli: unknown port role '$ROLE' (expected API_PORT or UI_PORT)" >&2
            exit 2
            ;;
    esac
    SERVICE_ID=$(python3 - "$MANIFEST" "$SERVICE_TYPE" <<'PY'
import json, sys
manifest = json.load(open(sys.argv[1]))
wanted = sys.argv[2]
for svc in manifest.get("services", []):
    if svc.get("type") == wanted:
        print(svc["id"])
        break
PY
)
    if [ -z "$SERVICE_ID" ]; then
        echo "vrooli: scenario '$SCENARIO' declares no $SERVICE_TYPE service" >&2
        exit 2
    fi
    exec "$RUNTIMECTL" --port "$PORT" --token-file "$TOKEN_FILE" port "$SERVICE_ID" "$PORT_NAME"
fi

exec "$RUNTIMECTL" --port "$PORT" --token-file "$TOKEN_FILE" "$@"
"#;

/// Write the shim into `bundle/bin/` with mode 0755.
pub fn write_cli_shim(bundle_dir: &Path) -> Result<PathBuf> {
    let bin_dir = bundle_dir.join("bin");
    fs::create_dir_all(&bin_dir)
        .with_context(|| format!("creating '{}'", bin_dir.display()))?;

    let shim_path = bin_dir.join(SHIM_NAME);
    fs::write(&shim_path, SHIM_SCRIPT)
        .with_context(|| format!("writing shim '{}'", shim_path.display()))?;
    make_executable(&shim_path)?;
    Ok(shim_path)
}
