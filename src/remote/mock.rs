//! In-process fake remote host for tests
//!
//! Supports scripted command output, failure injection per operation,
//! a small in-memory filesystem and call recording. Every client opened
//! by one [`MockConnector`] shares its state, so a test keeps the connector
//! and inspects what the stage did after the fact.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::transport::{Connector, RemoteClient, RemoteOutput, SshConfig, TransportError};
use crate::cancel::{ExecLimits, LimitStatus};

/// Operation to fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// `connect` returns `ConnectionFailed`
    Connect,
    /// Commands containing this text exit with status 1
    Exec(String),
    /// Uploads fail
    Put,
    /// Downloads fail
    Get,
    /// `close` returns an error (still counted)
    Close,
}

/// Everything the fake has been asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub connects: usize,
    pub execs: Vec<String>,
    /// (local, remote)
    pub puts: Vec<(PathBuf, String)>,
    pub gets: Vec<String>,
    pub closes: usize,
}

#[derive(Debug, Default)]
struct MockState {
    failures: Vec<MockFailure>,
    /// (substring, stdout)
    responses: Vec<(String, String)>,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    next_dir: u32,
    calls: MockCalls,
}

impl MockState {
    fn fails(&self, failure: &MockFailure) -> bool {
        self.failures.contains(failure)
    }

    fn failing_exec(&self, command: &str) -> Option<&str> {
        self.failures.iter().find_map(|f| match f {
            MockFailure::Exec(pattern) if command.contains(pattern.as_str()) => Some(pattern.as_str()),
            _ => None,
        })
    }

    fn exec(&mut self, command: &str) -> (String, RemoteOutput) {
        self.calls.execs.push(command.to_string());

        if let Some(pattern) = self.failing_exec(command) {
            let stderr = format!("injected failure for `{}`\n", pattern);
            return (String::new(), RemoteOutput { exit_code: 1, stderr });
        }

        let ok = |stdout: String| {
            (
                stdout,
                RemoteOutput {
                    exit_code: 0,
                    stderr: String::new(),
                },
            )
        };

        if command.trim() == "mktemp -d" {
            self.next_dir += 1;
            let dir = format!("/tmp/mock.{}", self.next_dir);
            self.dirs.insert(dir.clone());
            return ok(format!("{}\n", dir));
        }

        if let Some(target) = command.strip_prefix("rm -rf ") {
            let target = target.trim();
            let prefix = format!("{}/", target);
            self.dirs.retain(|d| d != target && !d.starts_with(&prefix));
            self.files.retain(|f, _| f != target && !f.starts_with(&prefix));
            return ok(String::new());
        }

        let stdout = self
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        ok(stdout)
    }
}

/// Connector handing out clients over shared fake state
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure
    pub fn fail(&self, failure: MockFailure) {
        self.lock().failures.push(failure);
    }

    /// Commands containing `pattern` print `stdout`
    pub fn respond(&self, pattern: impl Into<String>, stdout: impl Into<String>) {
        self.lock().responses.push((pattern.into(), stdout.into()));
    }

    /// Place a file on the fake host
    pub fn remote_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.into(), contents.into());
    }

    pub fn remote_file_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn remote_dir_exists(&self, dir: &str) -> bool {
        self.lock().dirs.contains(dir)
    }

    /// Snapshot of recorded calls
    pub fn calls(&self) -> MockCalls {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

impl Connector for MockConnector {
    fn connect(&self, config: &SshConfig) -> Result<Box<dyn RemoteClient>, TransportError> {
        let mut state = self.lock();
        state.calls.connects += 1;
        if state.fails(&MockFailure::Connect) {
            return Err(TransportError::ConnectionFailed(config.destination()));
        }
        Ok(Box::new(MockRemote {
            state: Arc::clone(&self.state),
        }))
    }
}

/// One fake connection
#[derive(Debug)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
}

impl RemoteClient for MockRemote {
    fn exec(
        &mut self,
        command: &str,
        limits: &ExecLimits,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<RemoteOutput, TransportError> {
        match limits.check(Instant::now()) {
            LimitStatus::Ok => {}
            LimitStatus::Cancelled => return Err(TransportError::Cancelled),
            LimitStatus::TimedOut => {
                return Err(TransportError::TimedOut(limits.timeout.unwrap_or_default()))
            }
        }

        let (stdout, output) = lock(&self.state).exec(command);
        for line in stdout.lines() {
            on_line(line);
        }
        Ok(output)
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.calls.puts.push((local.to_path_buf(), remote.to_string()));
        if state.fails(&MockFailure::Put) {
            return Err(TransportError::Transfer(format!("injected failure uploading {}", remote)));
        }

        let parent = remote.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        if !state.dirs.contains(parent) {
            return Err(TransportError::Transfer(format!("{}: no such directory", parent)));
        }

        let contents = fs::read(local)
            .map_err(|e| TransportError::Transfer(format!("{}: {}", local.display(), e)))?;
        state.files.insert(remote.to_string(), contents);
        Ok(())
    }

    fn get(&mut self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.calls.gets.push(remote.to_string());
        if state.fails(&MockFailure::Get) {
            return Err(TransportError::Transfer(format!("injected failure downloading {}", remote)));
        }

        let contents = state
            .files
            .get(remote)
            .ok_or_else(|| TransportError::Transfer(format!("{}: no such file", remote)))?;
        fs::write(local, contents)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.calls.closes += 1;
        if state.fails(&MockFailure::Close) {
            return Err(TransportError::Ssh("injected failure closing connection".to_string()));
        }
        Ok(())
    }
}

// A test that panicked mid-call must not hide the state from later assertions.
fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
