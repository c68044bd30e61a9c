//! Stages: named pipelines of steps
//!
//! A stage turns an artifact of its declared input representation into one
//! of its declared output representation. Two forms exist:
//! - [`LinearStage`]: a static list of single-input steps piped in order
//! - [`Script`]: explicit step invocations wired through a value table,
//!   for multi-input steps and long-lived resources
//!
//! Stages are configured once from the
//! [`ExecutionContext`](crate::config::ExecutionContext) and never change
//! afterwards; `run` may be called repeatedly with different inputs.

mod linear;
mod script;

pub use linear::LinearStage;
pub use script::{Script, ValueRef};

use stagewright_source::{convert, Source, SourceType};
use tracing::info;

use crate::errors::{DriverError, DriverResult};

/// Descriptive metadata of a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    /// Name used for configuration lookup
    pub name: String,
    /// Artifact state consumed
    pub src_state: String,
    /// Artifact state produced
    pub target_state: String,
    pub input_type: SourceType,
    pub output_type: SourceType,
    pub description: String,
}

impl StageInfo {
    /// Metadata for a stage named after the state it produces
    pub fn new(
        src_state: impl Into<String>,
        target_state: impl Into<String>,
        input_type: SourceType,
        output_type: SourceType,
    ) -> Self {
        let target_state = target_state.into();
        Self {
            name: target_state.clone(),
            src_state: src_state.into(),
            target_state,
            input_type,
            output_type,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A pipeline unit converting one artifact representation into another
pub trait Stage {
    fn info(&self) -> &StageInfo;

    /// Run the steps on an input already in `input_type`
    fn execute(&self, input: Source) -> DriverResult<Source>;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn src_state(&self) -> &str {
        &self.info().src_state
    }

    fn target_state(&self) -> &str {
        &self.info().target_state
    }

    fn input_type(&self) -> SourceType {
        self.info().input_type
    }

    fn output_type(&self) -> SourceType {
        self.info().output_type
    }

    fn description(&self) -> &str {
        &self.info().description
    }

    /// Convert the input to `input_type`, execute, and check the output type
    fn run(&self, input: Source) -> DriverResult<Source> {
        info!(
            stage = %self.name(),
            from = %self.src_state(),
            to = %self.target_state(),
            "running stage"
        );
        let input = convert(input, self.input_type())?;
        let output = self.execute(input)?;

        let expected = self.output_type();
        if expected != SourceType::Untyped && output.kind() != expected {
            return Err(DriverError::ReturnType {
                step: self.name().to_string(),
                expected,
                actual: output.kind(),
            });
        }
        info!(stage = %self.name(), "stage finished");
        Ok(output)
    }
}
