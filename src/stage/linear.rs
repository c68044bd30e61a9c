//! Linear stage form: each step's sole input is the previous step's output

use stagewright_source::{convert, Source};
use tracing::debug;

use super::{Stage, StageInfo};
use crate::errors::{DriverError, DriverResult};
use crate::step::Step;

/// A static ordered list of single-input steps run as a pipe.
///
/// Between steps the current value is converted, by at most one hop, to the
/// next step's parameter representation.
#[derive(Debug)]
pub struct LinearStage {
    info: StageInfo,
    steps: Vec<Step>,
}

impl LinearStage {
    /// Every step must take exactly one parameter and declare a return type
    pub fn new(info: StageInfo, steps: Vec<Step>) -> DriverResult<Self> {
        for step in &steps {
            if step.params().len() != 1 {
                return Err(DriverError::Arity {
                    step: step.name().to_string(),
                    expected: 1,
                    actual: step.params().len(),
                });
            }
            if step.returns().is_none() {
                return Err(DriverError::MissingReturn {
                    step: step.name().to_string(),
                    expected: info.output_type,
                });
            }
        }
        Ok(Self { info, steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl Stage for LinearStage {
    fn info(&self) -> &StageInfo {
        &self.info
    }

    fn execute(&self, input: Source) -> DriverResult<Source> {
        let mut value = input;
        for step in &self.steps {
            let param = &step.params()[0];
            if value.kind() != param.kind {
                debug!(step = %step.name(), from = %value.kind(), to = %param.kind, "converting");
            }
            value = convert(value, param.kind)?;
            value = step.invoke(vec![value])?.ok_or_else(|| DriverError::MissingReturn {
                step: step.name().to_string(),
                expected: param.kind,
            })?;
        }
        Ok(convert(value, self.info.output_type)?)
    }
}
