//! Local command execution
//!
//! Commands run through `sh -c` with the parent environment inherited.
//! Synchronous runs spool stdout to an anonymous temporary file and return
//! it rewound; stderr is spooled too unless the run's log level is DEBUG or
//! more verbose, in which case it streams straight to our own stderr.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::process::{Child, Command, Stdio};

use stagewright_source::Stream;
use tracing::{debug, Level};

use crate::errors::{DriverError, DriverResult};

/// A shell command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(String);

impl CommandLine {
    /// Join tokens with single spaces
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = tokens.into_iter().map(|t| t.as_ref().to_string()).collect();
        CommandLine(joined.join(" "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        CommandLine(line.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        CommandLine(line)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(tokens: Vec<String>) -> Self {
        CommandLine::from_tokens(tokens)
    }
}

impl From<Vec<&str>> for CommandLine {
    fn from(tokens: Vec<&str>) -> Self {
        CommandLine::from_tokens(tokens)
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(tokens: [&str; N]) -> Self {
        CommandLine::from_tokens(tokens)
    }
}

/// Options for one shell invocation
pub struct ShellOptions {
    /// Data fed to the command's stdin
    pub stdin: Option<Stream>,
    /// Wait for completion (false returns the live child)
    pub wait: bool,
    /// Send the command's stdout to stderr
    pub stdout_as_debug: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            stdin: None,
            wait: true,
            stdout_as_debug: false,
        }
    }
}

/// Result of a shell invocation
#[derive(Debug)]
pub enum ShellOutput {
    /// Spooled stdout, positioned at its start
    Completed(File),
    /// Still running; the caller waits and checks the exit status
    Running(Child),
}

impl ShellOutput {
    pub fn into_completed(self) -> Option<File> {
        match self {
            ShellOutput::Completed(file) => Some(file),
            ShellOutput::Running(_) => None,
        }
    }

    pub fn into_running(self) -> Option<Child> {
        match self {
            ShellOutput::Running(child) => Some(child),
            ShellOutput::Completed(_) => None,
        }
    }
}

/// Runs local commands for one tool invocation
#[derive(Debug, Clone, Copy)]
pub struct ShellRunner {
    level: Level,
}

impl ShellRunner {
    /// `level` is the run's log verbosity
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Whether stderr is passed through instead of captured
    pub fn passes_stderr_through(&self) -> bool {
        self.level >= Level::DEBUG
    }

    /// Run to completion and return the spooled stdout
    pub fn run(&self, cmd: impl Into<CommandLine>) -> DriverResult<File> {
        self.run_to_completion(cmd.into().0, None)
    }

    /// Run to completion with `stdin` attached
    pub fn run_with_input(&self, cmd: impl Into<CommandLine>, stdin: Stream) -> DriverResult<File> {
        self.run_to_completion(cmd.into().0, Some(stdin))
    }

    /// Start the command and return without waiting
    pub fn spawn(&self, cmd: impl Into<CommandLine>) -> DriverResult<Child> {
        self.start(cmd.into().0, None)
    }

    pub fn shell(&self, cmd: impl Into<CommandLine>, options: ShellOptions) -> DriverResult<ShellOutput> {
        let mut line = cmd.into().0;
        if options.stdout_as_debug {
            line.push_str(" >&2");
        }
        if options.wait {
            self.run_to_completion(line, options.stdin).map(ShellOutput::Completed)
        } else {
            self.start(line, options.stdin).map(ShellOutput::Running)
        }
    }

    fn run_to_completion(&self, line: String, stdin: Option<Stream>) -> DriverResult<File> {
        let (mut command, stderr_spool) = self.command(&line, stdin)?;

        let mut stdout = tempfile::tempfile()?;
        command.stdout(Stdio::from(stdout.try_clone()?));

        let status = command.status()?;
        if !status.success() {
            let stderr = match stderr_spool {
                Some(mut spool) => read_spool(&mut spool)?,
                None => String::new(),
            };
            return Err(DriverError::step_failure(line, stderr));
        }

        stdout.seek(SeekFrom::Start(0))?;
        Ok(stdout)
    }

    fn start(&self, line: String, stdin: Option<Stream>) -> DriverResult<Child> {
        // The caller owns the exit status, so captured stderr is left unread.
        let (mut command, _stderr_spool) = self.command(&line, stdin)?;
        command.stdout(Stdio::piped());
        Ok(command.spawn()?)
    }

    /// `sh -c line` with stdin attached and stderr routed for this run's level
    fn command(&self, line: &str, stdin: Option<Stream>) -> DriverResult<(Command, Option<File>)> {
        debug!(command = %line, "shell");

        let mut command = Command::new("sh");
        command.arg("-c").arg(line);

        match stdin {
            Some(stream) => {
                command.stdin(Stdio::from(spool(stream)?));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        let stderr_spool = if self.passes_stderr_through() {
            command.stderr(Stdio::inherit());
            None
        } else {
            let spool = tempfile::tempfile()?;
            command.stderr(Stdio::from(spool.try_clone()?));
            Some(spool)
        };

        Ok((command, stderr_spool))
    }
}

/// Copy a stream into an anonymous temp file rewound for reading
fn spool(mut stream: Stream) -> io::Result<File> {
    let mut file = tempfile::tempfile()?;
    io::copy(&mut stream, &mut file)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

fn read_spool(file: &mut File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
