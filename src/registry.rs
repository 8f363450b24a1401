//! Method registry — the name → handler-factory table.
//!
//! Populated explicitly, once, at construction: every built-in handler module
//! contributes its factories through `task::builtin_factories`, and embedding
//! servers can `register` additional handlers without touching a central
//! switch. Method names are unique by construction; a lookup that finds
//! nothing is a server misconfiguration, reported as an internal error and
//! never as a user-facing validation failure.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{Result, RpcError};
use crate::executor::Interrupt;
use crate::task::{builtin_factories, RemoteTask, ServerEnv};

/// Constructor for one request's handler instance.
pub type TaskFactory = fn(Arc<ServerEnv>) -> Box<dyn RemoteTask>;

pub struct MethodRegistry {
    entries: HashMap<&'static str, TaskFactory>,
}

impl MethodRegistry {
    /// An empty registry. Useful for servers that assemble their own method
    /// set; most callers want [`MethodRegistry::builtin`].
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The registry of all built-in methods.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (method, factory) in builtin_factories() {
            registry
                .register(method, factory)
                .expect("builtin method names are unique");
        }
        registry
    }

    /// Register a handler factory. Duplicate method names violate the
    /// registry's uniqueness invariant and are rejected as internal errors.
    pub fn register(&mut self, method: &'static str, factory: TaskFactory) -> Result<()> {
        if self.entries.insert(method, factory).is_some() {
            return Err(RpcError::Internal(format!(
                "duplicate registration for rpc method '{}'",
                method
            )));
        }
        Ok(())
    }

    /// Resolve a method name to its handler factory.
    pub fn resolve(&self, method: &str) -> Result<TaskFactory> {
        self.entries.get(method).copied().ok_or_else(|| {
            error!("no handler found for rpc method '{}'", method);
            RpcError::Internal(format!("no handler found for rpc method '{}'", method))
        })
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The logical request entry point: resolve the method, build its one-shot
/// handler, validate parameters, execute, and hand back the serialized
/// response envelope. Failures come back as [`RpcError`]s for the transport
/// layer to encode; none of them escape the request.
pub fn dispatch(
    registry: &MethodRegistry,
    env: &Arc<ServerEnv>,
    method: &str,
    params: Value,
    interrupt: &Receiver<Interrupt>,
) -> Result<Value> {
    let factory = registry.resolve(method)?;
    let mut task = factory(Arc::clone(env));
    debug!("dispatching rpc method {}", method);
    task.set_args(params)?;
    task.handle_request(registry, interrupt)
}
