//! An open remote connection plus its provisioned workspace

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

use super::transport::{RemoteClient, RemoteOutput, TransportError};
use crate::cancel::ExecLimits;
use crate::errors::{DriverError, DriverResult};

/// A remote session owned by exactly one stage invocation.
///
/// The workspace is recorded once `provision` succeeds so that `release`
/// knows what to remove, whichever phase failed.
pub struct RemoteSession {
    client: Box<dyn RemoteClient>,
    remote_dir: Option<String>,
}

impl RemoteSession {
    pub fn new(client: Box<dyn RemoteClient>) -> Self {
        Self {
            client,
            remote_dir: None,
        }
    }

    /// Provisioned remote temp directory, if any
    pub fn remote_dir(&self) -> Option<&str> {
        self.remote_dir.as_deref()
    }

    /// Create the remote temp directory with `mktemp -d`
    pub fn provision(&mut self) -> DriverResult<String> {
        let dir = self.capture("mktemp -d", &ExecLimits::none())?;
        let dir = dir.trim().to_string();
        if dir.is_empty() {
            return Err(DriverError::step_failure("mktemp -d", "no directory name returned"));
        }
        debug!(remote_dir = %dir, "provisioned remote directory");
        self.remote_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Run a command, streaming each stdout line to the debug log as it
    /// arrives; stderr is logged in full once the command ends
    pub fn run_logged(&mut self, command: &str, limits: &ExecLimits) -> DriverResult<()> {
        debug!(command = %command, "remote");
        let output = self.client.exec(command, limits, &mut |line: &str| {
            debug!(target: "stagewright::remote::stdout", "{}", line);
        })?;
        check(command, output)
    }

    /// Run a command and collect its stdout
    pub fn capture(&mut self, command: &str, limits: &ExecLimits) -> DriverResult<String> {
        debug!(command = %command, "remote");
        let mut stdout = String::new();
        let output = self.client.exec(command, limits, &mut |line: &str| {
            stdout.push_str(line);
            stdout.push('\n');
        })?;
        check(command, output)?;
        Ok(stdout)
    }

    pub fn put(&mut self, local: &Path, remote: &str) -> DriverResult<()> {
        debug!(local = %local.display(), remote = %remote, "upload");
        Ok(self.client.put(local, remote)?)
    }

    pub fn get(&mut self, remote: &str, local: &Path) -> DriverResult<()> {
        debug!(remote = %remote, local = %local.display(), "download");
        Ok(self.client.get(remote, local)?)
    }

    /// Remove the remote directory (best effort) and close the connection.
    ///
    /// Both are attempted; the first error is returned.
    pub fn release(&mut self) -> Result<(), TransportError> {
        let removed = match self.remote_dir.take() {
            Some(dir) => {
                let command = format!("rm -rf {}", dir);
                match self.client.exec(&command, &ExecLimits::none(), &mut |_: &str| {}) {
                    Ok(output) if !output.success() => {
                        warn!(remote_dir = %dir, stderr = %output.stderr.trim(), "could not remove remote directory");
                        Ok(())
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            None => Ok(()),
        };
        let closed = self.client.close();
        removed.and(closed)
    }
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("remote_dir", &self.remote_dir)
            .finish_non_exhaustive()
    }
}

fn check(command: &str, output: RemoteOutput) -> DriverResult<()> {
    if !output.stderr.is_empty() {
        debug!(target: "stagewright::remote::stderr", "{}", output.stderr.trim_end());
    }
    if output.success() {
        Ok(())
    } else {
        Err(DriverError::step_failure(command, output.stderr))
    }
}
