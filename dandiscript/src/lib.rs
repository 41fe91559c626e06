// DandiScript
// Small embedded scripting language: pest grammar, tree-walking async
// evaluator, and a host trait that is the script's only way out.

pub mod ast;
pub mod parser;
pub mod runtime;

pub use parser::parse_program;
pub use runtime::{Environment, Evaluator, HostRef, ScriptError, ScriptHost, ScriptResult, Value};
