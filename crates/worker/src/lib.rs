//! Worker agent.
//!
//! Keeps one connection to the dispatcher, sends heartbeats and telemetry,
//! downloads and runs dispatched tasks one at a time and reconnects with
//! exponential backoff when the link breaks.

pub mod artifact;
pub mod backoff;
pub mod components;
pub mod executors;
pub mod sandbox;
pub mod service;

pub use artifact::ArtifactClient;
pub use backoff::Backoff;
pub use executors::{ExecutionOutcome, ExecutionRequest, ProcessExecutor};
pub use sandbox::Sandbox;
pub use service::WorkerService;
