//! Collaborator seams: the backend adapter and the statement compiler.
//!
//! This core never talks to a warehouse or renders a template itself. It
//! drives these two object-safe traits, supplied by the embedding server.
//! The adapter's open-connection set is the one shared mutable resource
//! across concurrent requests; its locking discipline belongs to the adapter.

use serde::Serialize;

use crate::manifest::{Manifest, ManifestNode};

/// A table of rows returned by the backend for an executed statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryTable {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Backend adapter: executes compiled statements and, when it can, cancels
/// in-flight work.
pub trait Adapter: Send + Sync {
    /// Adapter type name, e.g. "postgres".
    fn name(&self) -> &str;

    /// Whether the backend supports cooperative cancellation.
    fn is_cancelable(&self) -> bool;

    /// Ask the backend to abort every open connection. Returns identifiers
    /// of the connections that were told to cancel. Only meaningful when
    /// [`Adapter::is_cancelable`] is true.
    fn cancel_open_connections(&self) -> Vec<String>;

    /// Run one compiled statement against the backend.
    fn execute(&self, sql: &str) -> anyhow::Result<QueryTable>;
}

/// Statement compiler: renders a node's raw template text into executable
/// SQL against a manifest.
pub trait SqlCompiler: Send + Sync {
    fn compile(&self, node: &ManifestNode, manifest: &Manifest) -> anyhow::Result<String>;
}
