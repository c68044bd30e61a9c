//! Scripted stage form
//!
//! A [`Script`] holds every intermediate value of one stage invocation in a
//! table. Steps are invoked explicitly with [`ValueRef`]s into that table.
//! References are only minted for values that already exist, so a step can
//! depend on the stage input or an earlier step's output but never on a
//! later one.
//!
//! Release steps registered with [`Script::defer`] run exactly once, on the
//! first of: [`Script::finish`], the failure of any later step, or the script
//! being dropped. They do not run while the thread is unwinding from a
//! panic. A failing release is logged and swallowed.

use std::mem;
use std::thread;

use stagewright_source::{Source, SourceType};
use tracing::{debug, warn};

use crate::errors::{DriverError, DriverResult};
use crate::step::Step;

/// Handle to a value in a script's table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRef(usize);

#[derive(Debug)]
struct Slot {
    /// Producing step, or "input"
    name: String,
    value: Option<Source>,
}

struct Deferred<'s> {
    step: &'s Step,
    args: Vec<ValueRef>,
}

/// One invocation of a scripted stage
pub struct Script<'s> {
    stage: String,
    slots: Vec<Slot>,
    releases: Vec<Deferred<'s>>,
}

impl<'s> Script<'s> {
    /// Seed the table with the stage input
    pub fn new(stage: impl Into<String>, input: Source) -> Self {
        Self {
            stage: stage.into(),
            slots: vec![Slot {
                name: "input".to_string(),
                value: Some(input),
            }],
            releases: Vec::new(),
        }
    }

    /// Reference to the stage input
    pub fn input(&self) -> ValueRef {
        ValueRef(0)
    }

    /// Representation of a live value, or None once consumed
    pub fn kind_of(&self, value: ValueRef) -> Option<SourceType> {
        self.slots
            .get(value.0)
            .and_then(|slot| slot.value.as_ref())
            .map(Source::kind)
    }

    /// Invoke a step that yields a value
    pub fn eval(&mut self, step: &Step, args: &[ValueRef]) -> DriverResult<ValueRef> {
        match self.invoke(step, args)? {
            Some(value) => {
                self.slots.push(Slot {
                    name: step.name().to_string(),
                    value: Some(value),
                });
                Ok(ValueRef(self.slots.len() - 1))
            }
            None => {
                let err = DriverError::MissingReturn {
                    step: step.name().to_string(),
                    expected: step.returns().unwrap_or(SourceType::Untyped),
                };
                self.release_all();
                Err(err)
            }
        }
    }

    /// Invoke a step for its side effects
    pub fn run(&mut self, step: &Step, args: &[ValueRef]) -> DriverResult<()> {
        self.invoke(step, args).map(|_| ())
    }

    /// Register a release step to run with `args` when the script ends
    pub fn defer(&mut self, step: &'s Step, args: &[ValueRef]) -> DriverResult<()> {
        if !step.is_release() {
            let err = DriverError::NotReleaseStep(step.name().to_string());
            self.release_all();
            return Err(err);
        }
        self.releases.push(Deferred {
            step,
            args: args.to_vec(),
        });
        Ok(())
    }

    /// Take the stage output, run pending releases, and check the output type
    pub fn finish(mut self, output: ValueRef, expected: SourceType) -> DriverResult<Source> {
        let taken = self.take(output, &self.stage.clone());
        self.release_all();
        let value = taken?;

        if expected != SourceType::Untyped && value.kind() != expected {
            return Err(DriverError::ReturnType {
                step: self.stage.clone(),
                expected,
                actual: value.kind(),
            });
        }
        Ok(value)
    }

    fn invoke(&mut self, step: &Step, args: &[ValueRef]) -> DriverResult<Option<Source>> {
        let result = self.apply(step, args);
        if result.is_err() {
            self.release_all();
        }
        result
    }

    /// Lend the referenced values to `step` and put back what it left
    fn apply(&mut self, step: &Step, args: &[ValueRef]) -> DriverResult<Option<Source>> {
        let mut values = Vec::with_capacity(args.len());
        for (position, value) in args.iter().enumerate() {
            match self.take(*value, step.name()) {
                Ok(source) => values.push(Some(source)),
                Err(e) => {
                    self.restore(&args[..position], values);
                    return Err(e);
                }
            }
        }

        let (result, leftovers) = step.call(values);
        self.restore(args, leftovers);
        result
    }

    fn take(&mut self, value: ValueRef, step: &str) -> DriverResult<Source> {
        let slot = self.slots.get_mut(value.0).ok_or_else(|| DriverError::ValueConsumed {
            step: step.to_string(),
            value: format!("#{}", value.0),
        })?;
        slot.value.take().ok_or_else(|| DriverError::ValueConsumed {
            step: step.to_string(),
            value: slot.name.clone(),
        })
    }

    fn restore(&mut self, args: &[ValueRef], values: Vec<Option<Source>>) {
        for (value, source) in args.iter().zip(values) {
            if let (Some(slot), Some(source)) = (self.slots.get_mut(value.0), source) {
                slot.value = Some(source);
            }
        }
    }

    fn release_all(&mut self) {
        let pending = mem::take(&mut self.releases);
        for deferred in pending.into_iter().rev() {
            debug!(stage = %self.stage, step = %deferred.step.name(), "releasing");
            if let Err(e) = self.apply(deferred.step, &deferred.args) {
                warn!(
                    stage = %self.stage,
                    step = %deferred.step.name(),
                    error = %e,
                    "release failed; continuing"
                );
            }
        }
    }
}

impl Drop for Script<'_> {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.release_all();
        }
    }
}
