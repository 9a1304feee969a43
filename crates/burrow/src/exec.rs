//! Running and exec'ing wrapped commands.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use burrow_common::paths::concat_argv;
use burrow_common::{BurrowError, BurrowResult, ChildStatus};

/// Translate an [`ExitStatus`] into the structured child descriptor.
#[must_use]
pub fn child_status(status: ExitStatus) -> ChildStatus {
    match status.signal() {
        Some(signo) => ChildStatus::Signalled(signo),
        None => ChildStatus::Exited(status.code().unwrap_or(-1)),
    }
}

/// A command to run inside an assembled environment.
#[derive(Debug, Default)]
pub struct CommandSpec {
    /// Program and arguments.
    pub argv: Vec<String>,
    /// Chroot into this directory before exec, when the environment has a
    /// physical root distinct from `/`.
    pub root_directory: Option<PathBuf>,
    /// Working directory after the chroot.
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// A plain command with no chroot.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        CommandSpec {
            argv,
            ..CommandSpec::default()
        }
    }

    fn build(&self) -> BurrowResult<Command> {
        let program = self.argv.first().ok_or_else(|| BurrowError::Internal {
            message: "empty argv".to_string(),
        })?;

        let mut command = Command::new(program);
        command.args(&self.argv[1..]);
        for (key, value) in &self.env {
            command.env(key, value);
        }

        if let Some(root) = self.root_directory.clone() {
            let workdir = self
                .working_directory
                .clone()
                .unwrap_or_else(|| PathBuf::from("/"));
            // Safety: chroot and chdir are async-signal-safe.
            unsafe {
                command.pre_exec(move || {
                    rustix::process::chroot(&root)?;
                    rustix::process::chdir(&workdir)?;
                    Ok(())
                });
            }
        } else if let Some(workdir) = &self.working_directory {
            command.current_dir(workdir);
        }

        Ok(command)
    }

    /// Run the command and wait for it.
    pub fn run(&self) -> BurrowResult<ChildStatus> {
        tracing::debug!(command = %concat_argv(&self.argv), "Running command");
        let status = self.build()?.status()?;
        Ok(child_status(status))
    }

    /// Run the command and fail unless it exits zero.
    pub fn run_checked(&self) -> BurrowResult<()> {
        let status = self.run()?;
        if status.success() {
            Ok(())
        } else {
            Err(BurrowError::ChildFailed {
                command: concat_argv(&self.argv),
                status,
            })
        }
    }

    /// Replace the current process with the command. Only returns on
    /// failure.
    pub fn exec(&self) -> BurrowError {
        match self.build() {
            Ok(mut command) => {
                let err = command.exec();
                BurrowError::Io(err)
            }
            Err(err) => err,
        }
    }
}

/// Resolve a bare command name through `$PATH`, the way the wrapper
/// resolves its own `argv[0]`. Names containing a slash are returned
/// unchanged.
#[must_use]
pub fn command_path(argv0: &str) -> PathBuf {
    if argv0.contains('/') {
        return PathBuf::from(argv0);
    }

    let path_env = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
    for dir in path_env.split(':') {
        let candidate = if dir.is_empty() {
            // An empty PATH component means the current directory.
            PathBuf::from(argv0)
        } else {
            Path::new(dir).join(argv0)
        };
        if rustix::fs::access(&candidate, rustix::fs::Access::EXEC_OK).is_ok() {
            return candidate;
        }
    }

    PathBuf::from(argv0)
}

/// The shell to fall back to when no command was given: `$SHELL`, then
/// `/bin/bash`, then `/bin/sh`.
#[must_use]
pub fn default_shell() -> Vec<String> {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return vec![shell];
        }
    }
    if Path::new("/bin/bash").exists() {
        return vec!["/bin/bash".to_string()];
    }
    vec!["/bin/sh".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_true_and_false() {
        let ok = CommandSpec::new(vec!["true".to_string()]).run().unwrap();
        assert_eq!(ok, ChildStatus::Exited(0));

        let bad = CommandSpec::new(vec!["false".to_string()]).run().unwrap();
        assert!(!bad.success());

        assert!(CommandSpec::new(vec!["false".to_string()])
            .run_checked()
            .is_err());
    }

    #[test]
    fn environment_is_passed() {
        let mut spec = CommandSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "test \"$MARKER\" = on".to_string(),
        ]);
        spec.env.push(("MARKER".to_string(), "on".to_string()));
        spec.run_checked().unwrap();
    }

    #[test]
    fn command_path_resolves_sh() {
        let resolved = command_path("sh");
        assert!(resolved.is_absolute());

        assert_eq!(command_path("/bin/sh"), PathBuf::from("/bin/sh"));
    }
}
