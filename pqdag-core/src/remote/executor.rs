//! Executor contract shared by every component

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Where a command runs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandTarget {
    /// The container that confines the allocation stages
    Sandbox,
    /// A shell on the controller itself
    Local,
    /// A cluster node reached over the secure channel
    Host(String),
}

impl CommandTarget {
    pub fn host(address: impl Into<String>) -> Self {
        CommandTarget::Host(address.into())
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Sandbox => write!(f, "sandbox"),
            CommandTarget::Local => write!(f, "local"),
            CommandTarget::Host(address) => write!(f, "{address}"),
        }
    }
}

/// Exit status and combined stdout/stderr of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Exit code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Exit code is one the caller tolerates
    pub fn accepted(&self, codes: &[i32]) -> bool {
        codes.contains(&self.exit_code)
    }
}

/// Runs one command to completion.
///
/// A non-zero exit is returned as data, not as an error; `Err` is reserved
/// for commands that could not be launched or that hit their deadline.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, target: &CommandTarget, command: &str) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_codes() {
        let no_match = CommandOutput::new(1, "");
        assert!(!no_match.success());
        assert!(no_match.accepted(&[0, 1]));
        assert!(!CommandOutput::new(255, "").accepted(&[0, 1]));
    }

    #[test]
    fn test_target_display() {
        assert_eq!(CommandTarget::host("10.0.0.2").to_string(), "10.0.0.2");
        assert_eq!(CommandTarget::Sandbox.to_string(), "sandbox");
    }
}
