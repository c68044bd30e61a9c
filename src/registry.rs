//! Stage registry and path search between artifact states

use std::collections::{HashMap, VecDeque};

use stagewright_source::Source;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::{ConfigProvider, ExecutionContext};
use crate::errors::{DriverError, DriverResult};
use crate::stage::Stage;
use crate::stages::{CommandStage, HwEmulationStage, EMULATION_STAGE};

/// Known stages, in registration order
#[derive(Default)]
pub struct Registry {
    stages: Vec<Box<dyn Stage>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in stages for `ctx`.
    ///
    /// The emulation stage is always present; every other stage table with
    /// an `exec` key becomes a [`CommandStage`].
    pub fn from_context(ctx: &ExecutionContext, cancel: Option<CancelToken>) -> DriverResult<Self> {
        let mut registry = Self::new();
        registry.register(Box::new(HwEmulationStage::new(ctx, cancel)?));

        for name in ctx.stage_names() {
            if name == EMULATION_STAGE {
                continue;
            }
            if ctx.get(name, "exec").is_some() {
                registry.register(Box::new(CommandStage::new(ctx, name)?));
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, stage: Box<dyn Stage>) {
        debug!(
            stage = %stage.name(),
            from = %stage.src_state(),
            to = %stage.target_state(),
            "registered stage"
        );
        self.stages.push(stage);
    }

    pub fn stages(&self) -> impl Iterator<Item = &dyn Stage> {
        self.stages.iter().map(|s| s.as_ref())
    }

    /// Shortest chain of stages turning `from` into `to`.
    ///
    /// Ties are broken by registration order. `from == to` is the empty path.
    pub fn path(&self, from: &str, to: &str) -> DriverResult<Vec<&dyn Stage>> {
        // state -> index of the stage that first reached it
        let mut reached: HashMap<&str, Option<usize>> = HashMap::new();
        reached.insert(from, None);
        let mut queue = VecDeque::from([from]);

        while let Some(state) = queue.pop_front() {
            if state == to {
                break;
            }
            for (index, stage) in self.stages.iter().enumerate() {
                if stage.src_state() != state || reached.contains_key(stage.target_state()) {
                    continue;
                }
                reached.insert(stage.target_state(), Some(index));
                queue.push_back(stage.target_state());
            }
        }

        if !reached.contains_key(to) {
            return Err(DriverError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let mut path = Vec::new();
        let mut state = to;
        while let Some(Some(index)) = reached.get(state) {
            let stage = self.stages[*index].as_ref();
            path.push(stage);
            state = stage.src_state();
        }
        path.reverse();
        Ok(path)
    }

    /// Run every stage from `from` to `to`, feeding each output to the next
    pub fn run_path(&self, from: &str, to: &str, input: Source) -> DriverResult<Source> {
        let path = self.path(from, to)?;
        info!(
            from = %from,
            to = %to,
            stages = %path.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> "),
            "running stage path"
        );

        path.into_iter().try_fold(input, |value, stage| stage.run(value))
    }
}
