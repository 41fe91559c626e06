// Host interface: the capability boundary between a running script and
// the embedding process.

use async_trait::async_trait;

use super::error::ScriptResult;
use super::values::{HostRef, Value};

/// Everything a script can reach outside its own bindings goes through
/// this trait. The embedder decides which objects exist, which properties
/// and methods they expose, and what they do; the interpreter itself has
/// no I/O of any kind.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Resolve a property access (`target.name`) on a host object.
    async fn get_property(&self, target: &HostRef, name: &str) -> ScriptResult<Value>;

    /// Invoke a method (`target.name(args...)`) on a host object.
    async fn call_method(&self, target: &HostRef, name: &str, args: Vec<Value>)
        -> ScriptResult<Value>;
}
