//! Error kinds shared across the packager and preflight layers.
//!
//! Library code propagates `anyhow::Error` the way the rest of the crate
//! does; the typed kinds below are raised at the leaves so the ingress can
//! downcast and pick an HTTP status without string matching.

use std::path::PathBuf;

/// Typed failure kinds with a stable HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("invalid input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service '{service}' has neither a binary nor a build config for platform '{platform}'")]
    ManifestIncomplete { service: String, platform: String },

    #[error("build failed for '{target}': {output}")]
    BuildFailed { target: String, output: String },

    #[error("unsupported platform '{0}' for this build backend")]
    UnsupportedPlatform(String),

    #[error("build command finished but produced no output at '{0}'")]
    MissingOutput(PathBuf),

    #[error("path '{path}' escapes '{base}'")]
    PathEscape { base: PathBuf, path: PathBuf },

    #[error("unknown id '{0}'")]
    UnknownId(String),

    #[error("supervisor did not become healthy within {0} seconds")]
    SupervisorUnreachable(u64),

    #[error("control api call {endpoint} failed with status {status}")]
    RuntimeCall { endpoint: String, status: u16 },

    #[error("persisted store at '{path}' is corrupt: {detail}")]
    CorruptStore { path: PathBuf, detail: String },
}

impl StageError {
    /// HTTP status the ingress reports for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            StageError::BadInput(_)
            | StageError::ManifestIncomplete { .. }
            | StageError::UnsupportedPlatform(_)
            | StageError::PathEscape { .. } => 400,
            StageError::NotFound(_) | StageError::UnknownId(_) => 404,
            _ => 500,
        }
    }
}

/// A preflight failure already mapped to an ingress status.
///
/// The preflight service raises this for whole-operation failures; step
/// level degradation travels inside the response instead.
#[derive(Debug, thiserror::Error)]
#[error("preflight failed ({status}): {source}")]
pub struct PreflightStatusError {
    pub status: u16,
    #[source]
    pub source: anyhow::Error,
}

impl PreflightStatusError {
    pub fn new(status: u16, source: anyhow::Error) -> Self {
        Self { status, source }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        let what = what.into();
        Self::new(404, StageError::NotFound(what).into())
    }

    pub fn bad_request(what: impl Into<String>) -> Self {
        Self::new(400, StageError::BadInput(what.into()).into())
    }
}

/// Status the ingress should report for an arbitrary error chain.
///
/// Walks the chain looking for a `PreflightStatusError` or a typed
/// `StageError`; anything else is a 500.
pub fn ingress_status(err: &anyhow::Error) -> u16 {
    for cause in err.chain() {
        if let Some(status_err) = cause.downcast_ref::<PreflightStatusError>() {
            return status_err.status;
        }
        if let Some(stage_err) = cause.downcast_ref::<StageError>() {
            return stage_err.http_status();
        }
    }
    500
}
