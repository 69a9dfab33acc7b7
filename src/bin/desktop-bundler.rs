use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use desktop_bundler::package::size::human_size;
use desktop_bundler::preflight::{PreflightRequest, PreflightService};
use desktop_bundler::server::{load_server_config, serve, ServerConfig};

/// Bundled-desktop packaging and preflight.
#[derive(Parser)]
#[command(name = "desktop-bundler", version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Package an app directory into <app>/bundle/
    Package {
        /// App directory containing the Electron project
        app_path: PathBuf,
        /// Bundle manifest (defaults to <app_path>/bundle.json)
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Target platform keys (repeatable; defaults to the manifest's)
        #[arg(long = "platform")]
        platforms: Vec<String>,
    },
    /// Run a preflight against a staged bundle
    Preflight {
        /// Path to the staged bundle.json
        manifest: PathBuf,
        /// Start services in a TTL-bounded session instead of a dry run
        #[arg(long)]
        start_services: bool,
        /// Session TTL in seconds (with --start-services)
        #[arg(long)]
        session_ttl: Option<u64>,
        /// Overall timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Log tail lines to collect per service
        #[arg(long, default_value_t = 0)]
        log_tail_lines: u32,
        /// Secret values as KEY=VALUE (repeatable)
        #[arg(long = "secret")]
        secrets: Vec<String>,
    },
    /// Run the preflight job/session HTTP server
    Serve {
        /// TOML config file ([server] bind, state_dir)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Package {
            app_path,
            manifest,
            platforms,
        } => run_package(app_path, manifest, platforms),
        Command::Preflight {
            manifest,
            start_services,
            session_ttl,
            timeout,
            log_tail_lines,
            secrets,
        } => run_preflight(
            manifest,
            start_services,
            session_ttl,
            timeout,
            log_tail_lines,
            secrets,
        ),
        Command::Serve { config } => {
            let config = match config {
                Some(path) => load_server_config(&path)?,
                None => ServerConfig::default(),
            };
            serve(config)
        }
    }
}

fn run_package(
    app_path: PathBuf,
    manifest: Option<PathBuf>,
    platforms: Vec<String>,
) -> Result<()> {
    let manifest_path = manifest.unwrap_or_else(|| app_path.join("bundle.json"));
    let report = desktop_bundler::package(&app_path, &manifest_path, &platforms)
        .with_context(|| format!("packaging '{}'", app_path.display()))?;

    println!("bundle: {}", report.bundle_dir.display());
    println!("platforms: {}", report.platforms.join(", "));
    for artifacts in &report.runtime {
        println!(
            "runtime [{}]: {}{}",
            artifacts.platform_key,
            artifacts.runtime.display(),
            if artifacts.runtimectl.is_some() {
                " (+runtimectl)"
            } else {
                " (runtimectl skipped)"
            }
        );
    }
    println!(
        "total size: {} across {} staged file(s)",
        human_size(report.size.total_bytes),
        report.staged_files.len()
    );
    if let Some(warning) = &report.size.warning {
        println!("size {}: {}", warning.level, warning.message);
    }
    Ok(())
}

fn run_preflight(
    manifest: PathBuf,
    start_services: bool,
    session_ttl: Option<u64>,
    timeout: Option<u64>,
    log_tail_lines: u32,
    secrets: Vec<String>,
) -> Result<()> {
    let request = PreflightRequest {
        bundle_manifest_path: manifest.display().to_string(),
        start_services,
        session_ttl_seconds: session_ttl,
        timeout_seconds: timeout,
        log_tail_lines,
        secrets: parse_secrets(&secrets)?,
        ..Default::default()
    };

    let service = PreflightService::new();
    let response = match service.run_bundle_preflight(&request) {
        Ok(response) => response,
        Err(err) => bail!("preflight failed ({}): {}", err.status, err.source),
    };

    for check in &response.checks {
        println!(
            "{:<28} {:?}{}",
            check.id,
            check.state,
            if check.detail.is_empty() {
                String::new()
            } else {
                format!("  ({})", check.detail)
            }
        );
    }
    if let Some(session_id) = &response.session_id {
        println!(
            "session: {} (expires {})",
            session_id,
            response.expires_at.as_deref().unwrap_or("-")
        );
    }
    for error in &response.errors {
        eprintln!("error: {error}");
    }
    Ok(())
}

fn parse_secrets(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut secrets = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --secret '{pair}': expected KEY=VALUE");
        };
        secrets.insert(key.to_string(), value.to_string());
    }
    Ok(secrets)
}
