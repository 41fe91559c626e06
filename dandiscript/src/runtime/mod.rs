pub mod environment;
pub mod error;
pub mod evaluator;
pub mod host;
pub mod values;

pub use environment::Environment;
pub use error::{ScriptError, ScriptResult};
pub use evaluator::Evaluator;
pub use host::ScriptHost;
pub use values::{values_equal, HostRef, Value};
