//! Podman backend.
//!
//! Shells out to the `podman` binary and captures a single line of
//! output where one is expected.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use burrow_common::{BurrowError, BurrowResult};

use super::ContainerRuntime;

/// Container runtime backed by the `podman` command line tool.
#[derive(Debug, Default)]
pub struct PodmanRuntime;

impl PodmanRuntime {
    fn run(&self, args: &[&str]) -> BurrowResult<bool> {
        tracing::debug!(?args, "Running podman");
        let status = Command::new("podman")
            .args(args)
            .stdout(Stdio::null())
            .status()
            .map_err(|err| BurrowError::Runtime {
                message: format!("Cannot execute podman: {err}"),
            })?;
        Ok(status.success())
    }

    fn run_and_capture(&self, args: &[&str]) -> BurrowResult<String> {
        tracing::debug!(?args, "Running podman");
        let output = Command::new("podman")
            .args(args)
            .output()
            .map_err(|err| BurrowError::Runtime {
                message: format!("Cannot execute podman: {err}"),
            })?;

        if !output.status.success() {
            return Err(BurrowError::Runtime {
                message: format!(
                    "podman {} exited with non-zero status: {}",
                    args.first().unwrap_or(&""),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        let first = lines.next().unwrap_or("").trim().to_string();
        for extra in lines.filter(|line| !line.trim().is_empty()) {
            tracing::warn!(line = extra, "Additional output from podman");
        }

        Ok(first)
    }
}

impl ContainerRuntime for PodmanRuntime {
    fn container_exists(&self, local_name: &str) -> BurrowResult<bool> {
        self.run(&["container", "exists", local_name])
    }

    fn container_start(&self, image_ref: &str, local_name: &str) -> BurrowResult<()> {
        if self.run(&["create", "--name", local_name, image_ref])? {
            Ok(())
        } else {
            Err(BurrowError::Runtime {
                message: format!("podman create failed for image \"{image_ref}\""),
            })
        }
    }

    fn container_mount(&self, local_name: &str) -> BurrowResult<PathBuf> {
        let path = self.run_and_capture(&["mount", local_name])?;
        if path.is_empty() {
            return Err(BurrowError::Runtime {
                message: format!("podman mount returned no path for \"{local_name}\""),
            });
        }
        Ok(PathBuf::from(path))
    }
}
