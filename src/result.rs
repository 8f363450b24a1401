//! Response envelopes and per-node results.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapter::QueryTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Error,
    Skipped,
}

/// Outcome of running one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    pub unique_id: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiled_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<QueryTable>,
    pub execution_time: f64,
}

/// Execution bookkeeping for one handler instance.
///
/// Written only by the worker thread, handed to the coordinating thread once
/// through the completion channel — that handoff is the only synchronization
/// the two contexts need.
#[derive(Debug, Default)]
pub struct RunState {
    pub run_count: usize,
    pub num_nodes: usize,
    pub node_results: Vec<NodeResult>,
    /// Nodes skipped because an upstream failed, keyed by unique id with the
    /// upstream cause. Always empty for ad-hoc requests (one node exists).
    pub skipped: HashMap<String, String>,
}

impl RunState {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            run_count: 0,
            num_nodes,
            node_results: Vec::with_capacity(num_nodes),
            skipped: HashMap::new(),
        }
    }
}

/// The response envelope for statement and project methods.
#[derive(Debug, Serialize)]
pub struct RemoteResult {
    pub results: Vec<NodeResult>,
    pub elapsed_time: f64,
    pub generated_at: DateTime<Utc>,
}

impl RemoteResult {
    /// Wrap handler output with its timing. `elapsed` comes from a monotonic
    /// clock read around the request's actual entry/exit points, so
    /// `elapsed_time` is always >= 0.
    pub fn assemble(
        results: Vec<NodeResult>,
        elapsed: Duration,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            results,
            elapsed_time: elapsed.as_secs_f64(),
            generated_at,
        }
    }
}

/// The response envelope for `docs.generate`.
#[derive(Debug, Serialize)]
pub struct RemoteCatalogResult {
    pub nodes: serde_json::Value,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_results: Option<Vec<NodeResult>>,
    /// Log collection happens outside this core; always empty here.
    pub logs: Vec<serde_json::Value>,
}

impl RemoteCatalogResult {
    /// The catalog envelope stamps its own generation time, independent of
    /// the execution timing.
    pub fn assemble(nodes: serde_json::Value, compile_results: Option<Vec<NodeResult>>) -> Self {
        Self {
            nodes,
            generated_at: Utc::now(),
            compile_results,
            logs: Vec::new(),
        }
    }
}
