//! Built-in stages

mod command;
mod emulation;

pub use command::CommandStage;
pub use emulation::{configured_limits, HwEmulationStage, Toolchain, STAGE_NAME as EMULATION_STAGE};
