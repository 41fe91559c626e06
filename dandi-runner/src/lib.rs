// DANDI script job runner
// Receives scripts over a message bus, executes them in a DandiScript
// sandbox against a capability-scoped dataset API, and publishes the
// captured output back.

pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod dandi;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod publisher;
pub mod sandbox;

pub use client::JobClient;
pub use config::RunnerConfig;
pub use dispatcher::{JobDispatcher, JobExecutor};
pub use error::{RunnerError, RunnerResult};
pub use protocol::{JobRequest, JobResponse, JobStatus};
pub use publisher::{ResponsePublisher, RetryPolicy};
pub use sandbox::SandboxExecutor;
