//! SSH transport for production use
//!
//! Drives the system `ssh` and `scp` binaries. `connect` authenticates once
//! and leaves a ControlMaster running on a private socket; every later
//! command and copy multiplexes over it, and `close` tells the master to
//! exit. Authentication is key/agent based (`BatchMode=yes`), never
//! password prompts.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

use tempfile::TempDir;
use tracing::debug;

use super::transport::{Connector, RemoteClient, RemoteOutput, SshConfig, TransportError};
use crate::cancel::{ExecLimits, LimitStatus};

/// ssh reserves this exit status for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// Opens [`SshClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(&self, config: &SshConfig) -> Result<Box<dyn RemoteClient>, TransportError> {
        Ok(Box::new(SshClient::open(config.clone())?))
    }
}

/// Program invoked for `ssh` or `scp`, with any arguments it always takes
#[derive(Debug, Clone)]
struct Tool {
    program: String,
    leading: Vec<String>,
}

impl Tool {
    fn system(name: &str) -> Self {
        Self {
            program: name.to_string(),
            leading: Vec::new(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading);
        command
    }
}

/// One multiplexed SSH connection
pub struct SshClient {
    config: SshConfig,
    ssh: Tool,
    scp: Tool,
    control_path: PathBuf,
    // Holds the socket directory for the lifetime of the connection.
    _control_dir: TempDir,
    open: bool,
}

impl SshClient {
    /// Authenticate and start the control master
    pub fn open(config: SshConfig) -> Result<Self, TransportError> {
        Self::open_with(config, Tool::system("ssh"), Tool::system("scp"))
    }

    fn open_with(config: SshConfig, ssh: Tool, scp: Tool) -> Result<Self, TransportError> {
        let control_dir = tempfile::Builder::new().prefix("stagewright-ssh-").tempdir()?;
        let control_path = control_dir.path().join("master.sock");

        let mut client = Self {
            config,
            ssh,
            scp,
            control_path,
            _control_dir: control_dir,
            open: false,
        };

        let mut args = client.ssh_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-f".to_string(),
            "-N".to_string(),
            client.config.destination(),
        ]);

        debug!(host = %client.config.host, port = client.config.port, "opening ssh control master");
        let output = client
            .ssh
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(host = %client.config.host, stderr = %stderr.trim(), "ssh connect failed");
            return Err(TransportError::ConnectionFailed(client.config.destination()));
        }

        client.open = true;
        Ok(client)
    }

    /// Options shared by ssh and scp
    fn option_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.config.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.config.server_alive_count_max),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];

        if let Some(ref key_path) = self.config.key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }

        args
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args = self.option_args();
        args.push("-p".to_string());
        args.push(self.config.port.to_string());
        args
    }

    fn scp_args(&self) -> Vec<String> {
        let mut args = self.option_args();
        args.push("-q".to_string());
        args.push("-P".to_string());
        args.push(self.config.port.to_string());
        args
    }

    fn scp(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let mut args = self.scp_args();
        args.push(from.to_string());
        args.push(to.to_string());

        let output = self
            .scp
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TransportError::Transfer(format!("Failed to spawn scp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Transfer(format!(
                "scp {} -> {} exited with {}: {}",
                from,
                to,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl RemoteClient for SshClient {
    fn exec(
        &mut self,
        command: &str,
        limits: &ExecLimits,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<RemoteOutput, TransportError> {
        let mut args = self.ssh_args();
        args.push(self.config.destination());
        args.push("--".to_string());
        args.push(command.to_string());

        let started = Instant::now();
        let mut child = self
            .ssh
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))?;

        // Drain stderr concurrently so a chatty command cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut bytes = Vec::new();
                let _ = stderr.read_to_end(&mut bytes);
                String::from_utf8_lossy(&bytes).into_owned()
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = line?;
                on_line(&line);

                let status = limits.check(started);
                if status != LimitStatus::Ok {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(limit_error(status, limits));
                }
            }
        }

        let status = child.wait()?;
        let stderr = stderr_reader
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();

        let limit = limits.check(started);
        if limit != LimitStatus::Ok {
            return Err(limit_error(limit, limits));
        }

        let exit_code = status.code().unwrap_or(-1);
        if exit_code == SSH_ERROR_EXIT {
            return Err(TransportError::Ssh(stderr.trim().to_string()));
        }

        Ok(RemoteOutput { exit_code, stderr })
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let to = format!("{}:{}", self.config.destination(), remote);
        self.scp(&local.display().to_string(), &to)
    }

    fn get(&mut self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let from = format!("{}:{}", self.config.destination(), remote);
        self.scp(&from, &local.display().to_string())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let mut args = self.ssh_args();
        args.extend(["-O".to_string(), "exit".to_string(), self.config.destination()]);

        let output = self
            .ssh
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Ssh(format!(
                "control master exit failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        // A master left running would outlive the tool.
        if self.open {
            let _ = self.close();
        }
    }
}

fn limit_error(status: LimitStatus, limits: &ExecLimits) -> TransportError {
    match (status, limits.timeout) {
        (LimitStatus::TimedOut, Some(timeout)) => TransportError::TimedOut(timeout),
        _ => TransportError::Cancelled,
    }
}
