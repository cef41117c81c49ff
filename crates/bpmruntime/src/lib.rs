//! Process execution runtime
//!
//! This crate provides the engine that runs process definitions: the request
//! queue and dispatch loop, the graph walk with parallel fan-out, the step
//! executor with its handler registry, and in-memory definition and history
//! stores.

mod dispatcher;
mod executor;
mod graph;
mod loader;
mod queue;
mod registry;
mod runtime;
mod step_executor;
mod store;

pub use dispatcher::DispatchLoop;
pub use executor::{ProcessExecutor, RunReport};
pub use graph::ProcessGraph;
pub use loader::ProcessLoader;
pub use queue::{RequestQueue, RequestStream};
pub use registry::HandlerRegistry;
pub use runtime::{BpmRuntime, RuntimeConfig};
pub use step_executor::{StepExecutor, StepExecutorOptions, FALLBACK_WARNING};
pub use store::{validate_config, InMemoryConfigStore, InMemoryInstanceStore, HISTORY_LIMIT};
