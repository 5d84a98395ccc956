//! Tool registry, validation, and the built-in tool set.

mod builtin;
mod dispatcher;
mod params;

pub use builtin::register_builtin_tools;
pub use dispatcher::{ToolDescriptor, ToolDispatcher, ToolHandler};
pub use params::{ParamDef, ParamType};
