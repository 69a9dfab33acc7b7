//! Bundled-desktop packaging and preflight.
//!
//! This crate turns a bundle manifest plus a scenario source tree into a
//! runnable desktop bundle, and operates that bundle in preflight mode:
//!
//! - **Packager** - manifest-driven staging of service binaries, assets,
//!   the supervisor runtime, and CLI helpers into `<app>/bundle/`
//! - **Compilers** - go/rust/npm/custom build backends for services that
//!   ship source instead of prebuilt binaries
//! - **Preflight** - supervisor lifecycle, session/job state machines,
//!   and the control-plane client used to validate bundles, push
//!   secrets, and collect readiness/ports/telemetry/log tails
//! - **Stores** - concurrency-safe build, desktop-record, and smoke-test
//!   ledgers with JSON persistence
//!
//! # Architecture
//!
//! ```text
//! manifest + source tree
//!    -> package::package()            stages <app>/bundle/
//! bundle directory
//!    -> preflight::PreflightService   spawns the supervisor (dry-run or
//!                                     TTL-bounded session)
//! supervisor control API
//!    -> supervisor::client            validate / secrets / readyz /
//!                                     ports / telemetry / log tails
//! results
//!    -> preflight::job::JobStore      step-by-step progress
//!    -> server                        HTTP ingress mapping
//! ```

pub mod collab;
pub mod compile;
pub mod error;
pub mod manifest;
pub mod package;
pub mod paths;
pub mod platform;
pub mod preflight;
pub mod server;
pub mod store;
pub mod supervisor;

pub use error::{ingress_status, PreflightStatusError, StageError};
pub use manifest::Manifest;
pub use package::{package, PackageReport};
pub use preflight::{PreflightRequest, PreflightResponse, PreflightService};
