//! Steps: atomic typed operations inside a stage
//!
//! A step fixes its parameter names and representations, an optional return
//! representation, and a body. Invocation checks every argument against the
//! declaration before the body runs and checks the body's output after, and
//! logs start/finish independently of what the body does.

use std::any::{type_name, Any};
use std::fmt;
use std::path::Path;
use std::time::Instant;

use stagewright_source::{Source, SourceType, Stream};
use tracing::{debug, info};

use crate::errors::{DriverError, DriverResult};

/// A named, typed parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: SourceType,
}

impl Param {
    /// Whether a value of `kind` may be bound to this parameter
    pub fn accepts(&self, kind: SourceType) -> bool {
        self.kind == SourceType::Untyped || self.kind == kind
    }
}

type StepBody = Box<dyn Fn(&mut StepArgs<'_>) -> DriverResult<Option<Source>> + Send + Sync>;

/// An atomic operation with declared parameter and return representations
pub struct Step {
    name: String,
    description: String,
    params: Vec<Param>,
    returns: Option<SourceType>,
    release: bool,
    body: StepBody,
}

impl Step {
    /// Start declaring a step
    pub fn builder(name: impl Into<String>) -> StepBuilder {
        StepBuilder {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            returns: None,
            release: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn returns(&self) -> Option<SourceType> {
        self.returns
    }

    /// Whether this step releases a resource acquired earlier in the stage
    pub fn is_release(&self) -> bool {
        self.release
    }

    /// Invoke the step, dropping whatever arguments the body did not consume
    pub fn invoke(&self, args: Vec<Source>) -> DriverResult<Option<Source>> {
        let (result, _leftovers) = self.call(args.into_iter().map(Some).collect());
        result
    }

    /// Invoke the step and hand back the arguments the body did not take.
    ///
    /// Leftovers are returned on every path, including failures, so the
    /// caller can still release resources passed in.
    pub(crate) fn call(
        &self,
        values: Vec<Option<Source>>,
    ) -> (DriverResult<Option<Source>>, Vec<Option<Source>>) {
        if let Err(e) = self.check_args(&values) {
            return (Err(e), values);
        }

        info!(step = %self.name, "starting");
        let started = Instant::now();

        let mut args = StepArgs {
            step: &self.name,
            params: &self.params,
            values,
        };
        let result = (self.body)(&mut args).and_then(|out| self.check_output(out));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => info!(step = %self.name, elapsed_ms, "finished"),
            Err(e) => debug!(step = %self.name, elapsed_ms, error = %e, "failed"),
        }

        (result, args.values)
    }

    fn check_args(&self, values: &[Option<Source>]) -> DriverResult<()> {
        if values.len() != self.params.len() {
            return Err(DriverError::Arity {
                step: self.name.clone(),
                expected: self.params.len(),
                actual: values.len(),
            });
        }

        for (param, value) in self.params.iter().zip(values) {
            let value = value.as_ref().ok_or_else(|| DriverError::ValueConsumed {
                step: self.name.clone(),
                value: param.name.clone(),
            })?;
            if !param.accepts(value.kind()) {
                return Err(DriverError::ParameterType {
                    step: self.name.clone(),
                    param: param.name.clone(),
                    expected: param.kind,
                    actual: value.kind(),
                });
            }
        }
        Ok(())
    }

    fn check_output(&self, output: Option<Source>) -> DriverResult<Option<Source>> {
        match (self.returns, output) {
            (Some(expected), None) => Err(DriverError::MissingReturn {
                step: self.name.clone(),
                expected,
            }),
            (Some(expected), Some(value))
                if expected != SourceType::Untyped && value.kind() != expected =>
            {
                Err(DriverError::ReturnType {
                    step: self.name.clone(),
                    expected,
                    actual: value.kind(),
                })
            }
            (None, Some(value)) => Err(DriverError::UnexpectedReturn {
                step: self.name.clone(),
                actual: value.kind(),
            }),
            (_, output) => Ok(output),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("release", &self.release)
            .finish_non_exhaustive()
    }
}

/// Declaration of a [`Step`]
#[derive(Debug)]
pub struct StepBuilder {
    name: String,
    description: String,
    params: Vec<Param>,
    returns: Option<SourceType>,
    release: bool,
}

impl StepBuilder {
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a parameter; order is the binding order
    pub fn param(mut self, name: impl Into<String>, kind: SourceType) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn returns(mut self, kind: SourceType) -> Self {
        self.returns = Some(kind);
        self
    }

    /// Mark the step as the release of a resource
    pub fn release(mut self) -> Self {
        self.release = true;
        self
    }

    /// Attach the body and finish the declaration
    pub fn body<F>(self, body: F) -> Step
    where
        F: Fn(&mut StepArgs<'_>) -> DriverResult<Option<Source>> + Send + Sync + 'static,
    {
        Step {
            name: self.name,
            description: self.description,
            params: self.params,
            returns: self.returns,
            release: self.release,
            body: Box::new(body),
        }
    }
}

/// Arguments lent to a step body.
///
/// Values are borrowed by default; [`StepArgs::take`] moves one out, which
/// consumes it for the rest of the stage.
pub struct StepArgs<'a> {
    step: &'a str,
    params: &'a [Param],
    values: Vec<Option<Source>>,
}

impl StepArgs<'_> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of the parameter called `name`
    pub fn position(&self, name: &str) -> DriverResult<usize> {
        self.params
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| DriverError::UnknownParameter {
                step: self.step.to_string(),
                param: name.to_string(),
            })
    }

    pub fn get(&self, index: usize) -> DriverResult<&Source> {
        let err = self.missing(index);
        self.values.get(index).and_then(Option::as_ref).ok_or(err)
    }

    pub fn get_mut(&mut self, index: usize) -> DriverResult<&mut Source> {
        let err = self.missing(index);
        self.values.get_mut(index).and_then(Option::as_mut).ok_or(err)
    }

    /// Move an argument out of the stage's value table
    pub fn take(&mut self, index: usize) -> DriverResult<Source> {
        let err = self.missing(index);
        self.values.get_mut(index).and_then(Option::take).ok_or(err)
    }

    pub fn path(&self, index: usize) -> DriverResult<&Path> {
        let source = self.get(index)?;
        source.as_path().ok_or_else(|| self.wrong_kind(index, SourceType::Path, source.kind()))
    }

    pub fn str(&self, index: usize) -> DriverResult<&str> {
        let source = self.get(index)?;
        source.as_str().ok_or_else(|| self.wrong_kind(index, SourceType::String, source.kind()))
    }

    pub fn stream_mut(&mut self, index: usize) -> DriverResult<&mut Stream> {
        let err = self.missing(index);
        let kind = self.get(index)?.kind();
        let wrong = self.wrong_kind(index, SourceType::Stream, kind);
        self.values
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(err)?
            .stream_mut()
            .ok_or(wrong)
    }

    /// Borrow an untyped argument as `T`
    pub fn untyped_mut<T: Any>(&mut self, index: usize) -> DriverResult<&mut T> {
        let err = self.missing(index);
        let mismatch = DriverError::UntypedMismatch {
            step: self.step.to_string(),
            param: self.param_name(index),
            expected: type_name::<T>(),
        };
        self.values
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(err)?
            .downcast_mut::<T>()
            .ok_or(mismatch)
    }

    fn param_name(&self, index: usize) -> String {
        self.params
            .get(index)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("#{}", index))
    }

    fn missing(&self, index: usize) -> DriverError {
        if index >= self.values.len() {
            DriverError::UnknownParameter {
                step: self.step.to_string(),
                param: format!("#{}", index),
            }
        } else {
            DriverError::ValueConsumed {
                step: self.step.to_string(),
                value: self.param_name(index),
            }
        }
    }

    fn wrong_kind(&self, index: usize, expected: SourceType, actual: SourceType) -> DriverError {
        DriverError::ParameterType {
            step: self.step.to_string(),
            param: self.param_name(index),
            expected,
            actual,
        }
    }
}
