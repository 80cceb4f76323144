//! Remote command execution
//!
//! Runs commands inside the allocation sandbox, on the controller itself,
//! or on a cluster node over SSH.

pub mod credentials;
pub mod executor;
pub mod noise;
pub mod process;
pub mod validate;

pub use credentials::{stage_identity, stage_identity_best_effort};
pub use executor::{CommandExecutor, CommandOutput, CommandTarget};
pub use noise::strip_transport_noise;
pub use process::ProcessExecutor;
pub use validate::safe_token;
