//! stagewright - staged compiler driver
//!
//! Transforms an input artifact through a chain of named stages, each
//! wrapping an external toolchain, into the requested output artifact.
//! Stages are built from typed [`Step`]s; values move between steps in the
//! representations of [`stagewright_source`] and are converted one hop at a
//! time where needed. The hardware-emulation stage drives a remote build
//! host over SSH and always releases the remote session it opened.

pub mod cancel;
pub mod config;
pub mod errors;
pub mod registry;
pub mod remote;
pub mod shell;
pub mod stage;
pub mod stages;
pub mod step;
pub mod telemetry;

pub use cancel::{CancelToken, ExecLimits};
pub use config::{ConfigProvider, ExecutionContext};
pub use errors::{DriverError, DriverResult, ErrorKind};
pub use registry::Registry;
pub use shell::{CommandLine, ShellRunner};
pub use stage::{LinearStage, Script, Stage, StageInfo, ValueRef};
pub use stages::{CommandStage, HwEmulationStage};
pub use step::{Param, Step, StepArgs};
pub use stagewright_source::{Source, SourceType, Stream};
