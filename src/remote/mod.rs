//! Remote execution over an authenticated remote-shell channel
//!
//! - [`RemoteClient`]/[`Connector`]: the seam between stages and the network
//! - [`SshConnector`]: production transport driving the system `ssh`/`scp`
//! - [`MockConnector`]: in-process fake for tests
//! - [`RemoteSession`]: an open client plus its provisioned temp directory

pub mod mock;
mod session;
pub mod ssh;
mod transport;

pub use mock::{MockCalls, MockConnector, MockFailure};
pub use session::RemoteSession;
pub use ssh::{SshClient, SshConnector};
pub use transport::{Connector, RemoteClient, RemoteOutput, SshConfig, TransportError};
