//! # at-target
//!
//! Targets for Autotune: JSON declarations of an external program, the
//! command target that runs it once per candidate, and resolution of the
//! output files it writes.

pub mod command;
pub mod declaration;
pub mod outputs;

pub use command::CommandTarget;
pub use declaration::{ParameterSpec, TargetDeclaration, WORKDIR};
