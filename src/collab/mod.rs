//! External collaborator contracts.
//!
//! The packager and preflight layers treat scenario analysis, Electron
//! scaffolding, and smoke-test execution as collaborators behind narrow
//! contracts: the types they exchange and the process invocations they
//! require, nothing more.

pub mod scenario;
pub mod smoke;
pub mod template;
