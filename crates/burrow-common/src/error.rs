//! Common error types for the Burrow workspace.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BurrowError`].
pub type BurrowResult<T> = Result<T, BurrowError>;

/// Errors shared across the Burrow workspace.
#[derive(Error, Diagnostic, Debug)]
pub enum BurrowError {
    /// Configuration error found while loading or validating a config.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(burrow::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Parse error with file position, used by the config loader.
    #[error("{file}:{line}: {message}")]
    #[diagnostic(code(burrow::config::parse))]
    Parse {
        /// File the error occurred in.
        file: PathBuf,
        /// One-based line number.
        line: u32,
        /// The error message, followed by any "included from" chain.
        message: String,
    },

    /// Environment not found by name or capability.
    #[error("Unknown environment: {name}")]
    #[diagnostic(code(burrow::environment::not_found))]
    EnvironmentNotFound {
        /// The environment name that could not be resolved.
        name: String,
    },

    /// Environment assembly already failed; terminal within this process.
    #[error("Environment {name} is in failed state")]
    #[diagnostic(code(burrow::environment::failed))]
    EnvironmentFailed {
        /// The failed environment.
        name: String,
    },

    /// No profile matches the invoked command name.
    #[error("No profile for command {name}")]
    #[diagnostic(code(burrow::profile::not_found))]
    ProfileNotFound {
        /// The command name looked up.
        name: String,
    },

    /// A mount syscall failed.
    #[error("Cannot mount {target} ({options}): {errno}")]
    #[diagnostic(code(burrow::mount))]
    Mount {
        /// Mount target path.
        target: PathBuf,
        /// The options string handed to the kernel, for diagnosis.
        options: String,
        /// Formatted system error.
        errno: String,
    },

    /// Namespace creation failed.
    #[error("Cannot create {kind} namespace: {errno}")]
    #[diagnostic(
        code(burrow::namespace),
        help("User namespaces may be disabled; try --privileged-namespace as root")
    )]
    Namespace {
        /// Namespace kind ("mount" or "user").
        kind: String,
        /// Formatted system error.
        errno: String,
    },

    /// Container runtime facade failure.
    #[error("Container runtime error: {message}")]
    #[diagnostic(code(burrow::runtime))]
    Runtime {
        /// The error message.
        message: String,
    },

    /// Capability registry failure.
    #[error("Capability error: {message}")]
    #[diagnostic(code(burrow::capability))]
    Capability {
        /// The error message.
        message: String,
    },

    /// Validation failure, e.g. the autoprofile stray-file check.
    #[error("Validation failed: {message}")]
    #[diagnostic(code(burrow::validation))]
    Validation {
        /// The error message.
        message: String,
    },

    /// A wrapped child command did not exit cleanly.
    #[error("Command \"{command}\" failed: {status}")]
    #[diagnostic(code(burrow::child))]
    ChildFailed {
        /// The command that was run.
        command: String,
        /// How the child ended.
        status: ChildStatus,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(burrow::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(burrow::serialization))]
    Serialization(String),

    /// Feature present in the model but not implemented.
    #[error("Not implemented: {feature}")]
    #[diagnostic(code(burrow::unsupported))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(burrow::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl BurrowError {
    /// Build a [`BurrowError::Io`] carrying the errno text of a failed
    /// syscall, captured at the call site.
    pub fn io_context(context: &str, err: std::io::Error) -> Self {
        BurrowError::Io(std::io::Error::new(
            err.kind(),
            format!("{context}: {err}"),
        ))
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal.
    Signalled(i32),
}

impl ChildStatus {
    /// True when the child exited normally with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, ChildStatus::Exited(0))
    }
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildStatus::Exited(code) => write!(f, "exited with status {code}"),
            ChildStatus::Signalled(signo) => write!(f, "crashed with signal {signo}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BurrowError::EnvironmentNotFound {
            name: "yast-env".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown environment: yast-env");
    }

    #[test]
    fn child_status_describe() {
        assert_eq!(ChildStatus::Exited(3).to_string(), "exited with status 3");
        assert_eq!(
            ChildStatus::Signalled(11).to_string(),
            "crashed with signal 11"
        );
        assert!(ChildStatus::Exited(0).success());
        assert!(!ChildStatus::Signalled(9).success());
    }
}
