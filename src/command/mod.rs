//! The command interpreter (§4.K): a typed argument grammar, a registry
//! of `(prefix, credential minimum, grammar, handler)` tuples, and the
//! hub's built-in operator commands.

pub mod builtin;
pub mod grammar;
pub mod registry;
pub mod status;

pub use builtin::register_builtins;
pub use grammar::{compile, parse_args, ArgSpec, ArgValue, Glyph, Grammar};
pub use registry::{Command, CommandContext, CommandRegistry, Handler};
pub use status::CommandStatus;
