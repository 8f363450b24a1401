//! Manifest — the metadata graph of named units of work and macro definitions.
//!
//! The baseline manifest is built once at server start (by the external
//! manifest builder) and shared read-only across concurrent requests behind
//! an `Arc`. Requests that need additions never touch the baseline: they get
//! an owned, request-scoped copy via [`Manifest::with_request_additions`],
//! which is discarded with the request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};

/// What a manifest node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Model,
    Seed,
    Test,
    /// One-off node synthesized from a caller-submitted statement.
    RpcCall,
}

/// A named unit of work in the metadata graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
    /// Fully-qualified id, e.g. `model.jaffle.orders` or `rpc.jaffle.q1`.
    pub unique_id: String,
    /// Display name (the caller-supplied name for ad-hoc nodes).
    pub name: String,
    /// Owning package (the project name for request-parsed nodes).
    pub package: String,
    pub kind: NodeKind,
    /// Raw statement text, untouched by this core.
    pub raw_sql: String,
    /// Node names referenced via `ref(...)` in the raw statement.
    pub refs: Vec<String>,
    /// Bare names of macros the statement may invoke.
    pub macros: Vec<String>,
    /// Resolved upstream unique ids. Filled by the graph merge; empty until
    /// the node has been linked against a manifest.
    pub depends_on: Vec<String>,
}

/// A reusable macro definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDef {
    /// Fully-qualified id, e.g. `macro.jaffle.cents_to_dollars`.
    pub unique_id: String,
    pub name: String,
    pub package: String,
    /// Full definition block, `{% macro %}` through `{% endmacro %}`.
    pub body: String,
}

/// The metadata graph: nodes plus macro definitions, keyed by unique id.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub nodes: HashMap<String, ManifestNode>,
    pub macros: HashMap<String, MacroDef>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ManifestNode) {
        self.nodes.insert(node.unique_id.clone(), node);
    }

    pub fn add_macro(&mut self, def: MacroDef) {
        self.macros.insert(def.unique_id.clone(), def);
    }

    /// Look a node up by display name (ref targets are names, not ids).
    pub fn find_node_by_name(&self, name: &str) -> Option<&ManifestNode> {
        self.nodes.values().find(|n| n.name == name)
    }

    /// True if any known macro (baseline or supplied extras) has this name.
    pub fn has_macro_named(&self, name: &str) -> bool {
        self.macros.values().any(|m| m.name == name)
    }

    /// Build the request-scoped manifest: a copy of this graph extended with
    /// the request's macro overrides (last-write-wins per unique id) and its
    /// single ad-hoc node, with the node's refs resolved against the copy.
    ///
    /// `self` is never mutated; callers keep sharing the baseline safely.
    pub fn with_request_additions(
        &self,
        mut node: ManifestNode,
        macro_overrides: &HashMap<String, MacroDef>,
    ) -> Result<Manifest> {
        let mut derived = self.clone();
        for def in macro_overrides.values() {
            derived.macros.insert(def.unique_id.clone(), def.clone());
        }

        node.depends_on.clear();
        for target in &node.refs {
            let upstream = derived.find_node_by_name(target).ok_or_else(|| {
                RpcError::Resolution(format!(
                    "node '{}' references '{}', which was not found in the project",
                    node.name, target
                ))
            })?;
            node.depends_on.push(upstream.unique_id.clone());
        }

        derived.nodes.insert(node.unique_id.clone(), node);
        Ok(derived)
    }
}

/// Compile ordering over a manifest's nodes.
///
/// Request-local artifact: recomputed from each request-scoped manifest and
/// discarded with it, never persisted.
#[derive(Debug)]
pub struct Linker {
    order: Vec<String>,
}

impl Linker {
    /// Topologically order the manifest's nodes (upstream before downstream).
    /// A dependency cycle means the graph builder upstream broke its
    /// contract, so it surfaces as an internal error.
    pub fn compile(manifest: &Manifest) -> Result<Linker> {
        let mut indegree: HashMap<&str, usize> = manifest
            .nodes
            .keys()
            .map(|id| (id.as_str(), 0))
            .collect();
        for node in manifest.nodes.values() {
            // Distinct deps only: a duplicate entry is one edge, not two.
            let mut seen: Vec<&str> = Vec::new();
            for dep in &node.depends_on {
                if manifest.nodes.contains_key(dep) && !seen.contains(&dep.as_str()) {
                    seen.push(dep.as_str());
                    *indegree.entry(node.unique_id.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(manifest.nodes.len());
        while let Some(id) = ready.pop() {
            order.push(id.to_string());
            let mut unblocked: Vec<&str> = Vec::new();
            for node in manifest.nodes.values() {
                if node.depends_on.iter().any(|d| d == id) {
                    let d = indegree
                        .get_mut(node.unique_id.as_str())
                        .ok_or_else(|| {
                            RpcError::Internal("linker saw an unknown node".to_string())
                        })?;
                    *d -= 1;
                    if *d == 0 {
                        unblocked.push(node.unique_id.as_str());
                    }
                }
            }
            unblocked.sort_unstable();
            ready.extend(unblocked);
            ready.sort_unstable();
        }

        if order.len() != manifest.nodes.len() {
            return Err(RpcError::Internal(
                "dependency cycle detected while computing compile order".to_string(),
            ));
        }

        Ok(Linker { order })
    }

    /// Unique ids in execution order.
    pub fn order(&self) -> &[String] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(project: &str, name: &str, refs: &[&str]) -> ManifestNode {
        ManifestNode {
            unique_id: format!("model.{}.{}", project, name),
            name: name.to_string(),
            package: project.to_string(),
            kind: NodeKind::Model,
            raw_sql: format!("select * from {}", name),
            refs: refs.iter().map(|s| s.to_string()).collect(),
            macros: vec![],
            depends_on: vec![],
        }
    }

    fn rpc_node(project: &str, name: &str, refs: &[&str]) -> ManifestNode {
        ManifestNode {
            unique_id: format!("rpc.{}.{}", project, name),
            kind: NodeKind::RpcCall,
            ..model(project, name, refs)
        }
    }

    fn baseline() -> Manifest {
        let mut manifest = Manifest::new();
        let mut orders = model("jaffle", "orders", &["customers"]);
        orders.depends_on = vec!["model.jaffle.customers".to_string()];
        manifest.add_node(model("jaffle", "customers", &[]));
        manifest.add_node(orders);
        manifest.add_macro(MacroDef {
            unique_id: "macro.jaffle.cents_to_dollars".to_string(),
            name: "cents_to_dollars".to_string(),
            package: "jaffle".to_string(),
            body: "{% macro cents_to_dollars(x) %}{{ x }} / 100{% endmacro %}".to_string(),
        });
        manifest
    }

    #[test]
    fn test_merge_resolves_refs_against_derived_graph() {
        let base = baseline();
        let node = rpc_node("jaffle", "q1", &["orders"]);

        let derived = base
            .with_request_additions(node, &HashMap::new())
            .unwrap();

        let merged = &derived.nodes["rpc.jaffle.q1"];
        assert_eq!(merged.depends_on, vec!["model.jaffle.orders".to_string()]);
    }

    #[test]
    fn test_merge_unknown_ref_is_resolution_error() {
        let base = baseline();
        let node = rpc_node("jaffle", "q1", &["no_such_model"]);

        let err = base
            .with_request_additions(node, &HashMap::new())
            .unwrap_err();
        assert_eq!(err.code(), "RESOLUTION_ERROR");
        assert!(err.to_string().contains("no_such_model"));
    }

    #[test]
    fn test_merge_never_mutates_baseline() {
        let base = baseline();
        let node = rpc_node("jaffle", "q1", &["orders"]);
        let mut overrides = HashMap::new();
        overrides.insert(
            "macro.jaffle.extra".to_string(),
            MacroDef {
                unique_id: "macro.jaffle.extra".to_string(),
                name: "extra".to_string(),
                package: "jaffle".to_string(),
                body: "{% macro extra() %}1{% endmacro %}".to_string(),
            },
        );

        let mut derived = base.with_request_additions(node, &overrides).unwrap();
        // Mutate the request-scoped copy hard.
        derived.macros.clear();
        derived.nodes.clear();

        // The baseline is untouched: a concurrent request still sees it whole.
        assert_eq!(base.nodes.len(), 2);
        assert_eq!(base.macros.len(), 1);
        assert!(!base.nodes.contains_key("rpc.jaffle.q1"));
        assert!(!base.macros.contains_key("macro.jaffle.extra"));
    }

    #[test]
    fn test_macro_overrides_last_write_wins() {
        let base = baseline();
        let node = rpc_node("jaffle", "q1", &[]);
        let mut overrides = HashMap::new();
        overrides.insert(
            "macro.jaffle.cents_to_dollars".to_string(),
            MacroDef {
                unique_id: "macro.jaffle.cents_to_dollars".to_string(),
                name: "cents_to_dollars".to_string(),
                package: "jaffle".to_string(),
                body: "{% macro cents_to_dollars(x) %}{{ x }} * 0.01{% endmacro %}".to_string(),
            },
        );

        let derived = base.with_request_additions(node, &overrides).unwrap();
        assert!(derived.macros["macro.jaffle.cents_to_dollars"]
            .body
            .contains("0.01"));
        // Baseline still carries the original body.
        assert!(base.macros["macro.jaffle.cents_to_dollars"]
            .body
            .contains("/ 100"));
    }

    #[test]
    fn test_linker_orders_upstream_first() {
        let base = baseline();
        let node = rpc_node("jaffle", "q1", &["orders"]);
        let derived = base
            .with_request_additions(node, &HashMap::new())
            .unwrap();

        let linker = Linker::compile(&derived).unwrap();
        let order = linker.order();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("model.jaffle.customers") < pos("model.jaffle.orders"));
        assert!(pos("model.jaffle.orders") < pos("rpc.jaffle.q1"));
    }

    #[test]
    fn test_linker_rejects_cycles() {
        let mut manifest = Manifest::new();
        let mut a = model("p", "a", &["b"]);
        a.depends_on = vec!["model.p.b".to_string()];
        let mut b = model("p", "b", &["a"]);
        b.depends_on = vec!["model.p.a".to_string()];
        manifest.add_node(a);
        manifest.add_node(b);

        let err = Linker::compile(&manifest).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
