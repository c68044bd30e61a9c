//! Single-command stages
//!
//! A stage table with an `exec` key becomes a stage that runs
//! `<exec> <flags> <input>` locally and streams back its stdout:
//!
//! ```toml
//! [stages.verilog]
//! src = "futil"
//! exec = "futil"
//! flags = "-b verilog"
//! ```

use serde_json::Value;
use stagewright_source::{Source, SourceType, Stream};

use crate::config::{ConfigProvider, ExecutionContext};
use crate::errors::{DriverError, DriverResult};
use crate::shell::{CommandLine, ShellRunner};
use crate::stage::{LinearStage, Stage, StageInfo};
use crate::step::Step;

/// A stage wrapping one local command
pub struct CommandStage {
    inner: LinearStage,
}

impl CommandStage {
    /// Build the stage configured under `stages.<name>`
    pub fn new(ctx: &ExecutionContext, name: &str) -> DriverResult<Self> {
        let exec = ctx.require_str(name, "exec")?.to_string();
        let src = ctx.require_str(name, "src")?.to_string();
        let flags = flags(ctx, name)?;
        let runner = ShellRunner::new(ctx.verbosity());

        let description = ctx
            .get_str(name, "description")
            .map(str::to_string)
            .unwrap_or_else(|| format!("Runs {}", exec));
        let info = StageInfo::new(src, name, SourceType::Path, SourceType::Stream).describe(description);

        let step = Step::builder(exec.clone())
            .describe(format!("Run `{}` on the input", exec))
            .param("input", SourceType::Path)
            .returns(SourceType::Stream)
            .body(move |args| {
                let input = args.path(0)?.display().to_string();
                let mut tokens = vec![exec.clone()];
                tokens.extend(flags.iter().cloned());
                tokens.push(input);

                let stdout = runner.run(CommandLine::from_tokens(tokens))?;
                Ok(Some(Source::Stream(Stream::from(stdout))))
            });

        Ok(Self {
            inner: LinearStage::new(info, vec![step])?,
        })
    }
}

impl Stage for CommandStage {
    fn info(&self) -> &StageInfo {
        self.inner.info()
    }

    fn execute(&self, input: Source) -> DriverResult<Source> {
        self.inner.execute(input)
    }
}

/// `flags` as a single string or a list of strings
fn flags(ctx: &ExecutionContext, name: &str) -> DriverResult<Vec<String>> {
    match ctx.get(name, "flags") {
        None => Ok(Vec::new()),
        Some(Value::String(flags)) if flags.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(flags)) => Ok(vec![flags.trim().to_string()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid_flags(name))
            })
            .collect(),
        Some(_) => Err(invalid_flags(name)),
    }
}

fn invalid_flags(name: &str) -> DriverError {
    DriverError::MissingDynamicConfiguration(format!("{}.flags (string or list of strings)", name))
}
