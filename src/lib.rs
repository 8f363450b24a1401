//! Quarry RPC task core.
//!
//! Request-scoped, cancellable method execution for the Quarry SQL
//! transformation server: resolve a method name to its handler, build the
//! transient execution context the handler needs, run the work on a
//! dedicated worker, and wrap the outcome in a timed response envelope.
//!
//! The pieces, leaves first:
//!
//! - [`splitter`] — partitions request source into macro blocks and the
//!   primary statement
//! - [`parser`] / [`context`] — build the per-request ad-hoc node and the
//!   request-scoped copy of the baseline manifest
//! - [`registry`] — the explicit method → handler table and the `dispatch`
//!   entry point
//! - [`executor`] — the worker thread + interrupt supervision used by every
//!   handler
//! - [`result`] — response envelopes with timing
//!
//! Transport, template compilation, the manifest builder, and the warehouse
//! adapters live outside this crate; the traits in [`adapter`] and
//! [`task::project`] are the seams they plug into.

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod parser;
pub mod registry;
pub mod result;
pub mod splitter;
pub mod task;

pub use adapter::{Adapter, QueryTable, SqlCompiler};
pub use config::RuntimeConfig;
pub use context::RequestContext;
pub use error::{Result, RpcError};
pub use executor::{interrupt_channel, run_on_worker, CancelHandle, Interrupt};
pub use manifest::{Linker, MacroDef, Manifest, ManifestNode, NodeKind};
pub use registry::{dispatch, MethodRegistry, TaskFactory};
pub use result::{NodeResult, NodeStatus, RemoteCatalogResult, RemoteResult, RunState};
pub use splitter::{split_request_source, SplitSource};
pub use task::project::{CatalogArtifact, ProjectRunner, Selection};
pub use task::{RemoteTask, ServerEnv};
