pub mod errors;
pub mod objective;
pub mod parameter;
pub mod target;

pub use errors::*;
pub use objective::*;
pub use parameter::*;
pub use target::*;
