//! Transport seam for remote execution
//!
//! Abstracts the remote-shell connection for testability.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::cancel::ExecLimits;

/// Result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    /// Full stderr, collected after the command ended
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An open connection to a remote host
pub trait RemoteClient: Send {
    /// Run `command` in the remote shell, calling `on_line` for each stdout
    /// line as it arrives
    fn exec(
        &mut self,
        command: &str,
        limits: &ExecLimits,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<RemoteOutput, TransportError>;

    /// Copy a local file to a remote path
    fn put(&mut self, local: &Path, remote: &str) -> Result<(), TransportError>;

    /// Copy a remote file to a local path
    fn get(&mut self, remote: &str, local: &Path) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens connections
pub trait Connector: Send + Sync {
    fn connect(&self, config: &SshConfig) -> Result<Box<dyn RemoteClient>, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {0} failed")]
    ConnectionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("remote command cancelled")]
    Cancelled,

    #[error("remote command exceeded {0:?}")]
    TimedOut(Duration),
}

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote host
    pub host: String,
    /// SSH user (None lets ssh pick its default)
    pub user: Option<String>,
    /// SSH port (default 22)
    pub port: u16,
    /// Path to SSH private key (None uses the agent / ssh config)
    pub key_path: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_seconds: u32,
    /// Server alive interval for detecting dead connections
    pub server_alive_interval: u32,
    /// Server alive count max
    pub server_alive_count_max: u32,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: None,
            port: 22,
            key_path: None,
            connect_timeout_seconds: 30,
            server_alive_interval: 15,
            server_alive_count_max: 2,
        }
    }
}

impl SshConfig {
    /// `user@host`, or just `host`
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_defaults() {
        let config = SshConfig::default();
        assert_eq!(config.port, 22);
        assert!(config.user.is_none());
        assert_eq!(config.connect_timeout_seconds, 30);
    }

    #[test]
    fn test_destination() {
        let mut config = SshConfig {
            host: "fpga01".into(),
            ..SshConfig::default()
        };
        assert_eq!(config.destination(), "fpga01");

        config.user = Some("builder".into());
        assert_eq!(config.destination(), "builder@fpga01");
    }
}
