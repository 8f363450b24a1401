//! Ephemeral context builder.
//!
//! Builds everything a single ad-hoc request executes against: the split
//! source, the request's macro overrides, its one ad-hoc node, a
//! request-scoped copy of the baseline manifest, and the compile ordering
//! over that copy. All of it is owned by the request and discarded with it.
//! Every failure here happens before any worker thread is spawned.

use std::collections::HashMap;

use crate::config::RuntimeConfig;
use crate::error::{Result, RpcError};
use crate::manifest::{Linker, MacroDef, Manifest, ManifestNode};
use crate::parser;
use crate::splitter;

/// Everything one ad-hoc request executes against. Owned by the request.
#[derive(Debug)]
pub struct RequestContext {
    /// The ad-hoc node, with `depends_on` resolved against `manifest`.
    pub node: ManifestNode,
    /// Request-scoped manifest: baseline + overrides + the ad-hoc node.
    pub manifest: Manifest,
    /// Request-local compile ordering; never persisted.
    pub linker: Linker,
}

impl RequestContext {
    /// Build the context for one request.
    ///
    /// `raw_sql` is the wire-encoded source; `macro_param` is the caller's
    /// optional macros override text. The caller-supplied text is parsed
    /// first and macro blocks split out of the statement second, so
    /// in-statement definitions win under last-write-wins keying.
    pub fn build(
        name: &str,
        raw_sql: &str,
        macro_param: Option<&str>,
        base: &Manifest,
        config: &RuntimeConfig,
    ) -> Result<RequestContext> {
        let split = splitter::split_request_source(raw_sql)?;

        let mut macro_overrides: HashMap<String, MacroDef> = HashMap::new();
        for text in [macro_param.unwrap_or(""), split.macros.as_str()] {
            for def in parser::parse_macros(text, config)? {
                macro_overrides.insert(def.unique_id.clone(), def);
            }
        }

        let node = parser::parse_adhoc_node(name, &split.statement, config)?;

        resolve_macro_calls(&node, &macro_overrides, base)?;

        let manifest = base.with_request_additions(node.clone(), &macro_overrides)?;
        let linker = Linker::compile(&manifest)?;
        let node = manifest
            .nodes
            .get(&node.unique_id)
            .cloned()
            .ok_or_else(|| {
                RpcError::Internal("merged manifest lost the request node".to_string())
            })?;

        Ok(RequestContext {
            node,
            manifest,
            linker,
        })
    }
}

/// Check that every macro the request may invoke — from the ad-hoc statement
/// and from the bodies of its own macro overrides — resolves against the
/// baseline macros extended with those overrides.
fn resolve_macro_calls(
    node: &ManifestNode,
    overrides: &HashMap<String, MacroDef>,
    base: &Manifest,
) -> Result<()> {
    let known = |name: &str| {
        base.has_macro_named(name) || overrides.values().any(|m| m.name == name)
    };

    for call in &node.macros {
        if !known(call) {
            return Err(RpcError::Resolution(format!(
                "macro '{}' is undefined",
                call
            )));
        }
    }

    for def in overrides.values() {
        for call in parser::extract_macro_calls(&def.body) {
            if call != def.name && !known(&call) {
                return Err(RpcError::Resolution(format!(
                    "macro '{}' (called from macro '{}') is undefined",
                    call, def.name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::NodeKind;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    fn encode(text: &str) -> String {
        BASE64.encode(text.as_bytes())
    }

    fn config() -> RuntimeConfig {
        RuntimeConfig::new("jaffle")
    }

    fn baseline() -> Manifest {
        let mut manifest = Manifest::new();
        manifest.add_node(ManifestNode {
            unique_id: "model.jaffle.orders".to_string(),
            name: "orders".to_string(),
            package: "jaffle".to_string(),
            kind: NodeKind::Model,
            raw_sql: "select * from raw_orders".to_string(),
            refs: vec![],
            macros: vec![],
            depends_on: vec![],
        });
        manifest.add_macro(MacroDef {
            unique_id: "macro.jaffle.cents_to_dollars".to_string(),
            name: "cents_to_dollars".to_string(),
            package: "jaffle".to_string(),
            body: "{% macro cents_to_dollars(x) %}{{ x }} / 100{% endmacro %}".to_string(),
        });
        manifest
    }

    #[test]
    fn test_build_plain_statement() {
        let base = baseline();
        let ctx =
            RequestContext::build("q1", &encode("select 1 as id"), None, &base, &config())
                .unwrap();

        assert_eq!(ctx.node.unique_id, "rpc.jaffle.q1");
        assert_eq!(ctx.node.raw_sql, "select 1 as id");
        assert!(ctx.manifest.nodes.contains_key("rpc.jaffle.q1"));
        assert!(ctx.linker.order().contains(&"rpc.jaffle.q1".to_string()));
        // Baseline untouched.
        assert!(!base.nodes.contains_key("rpc.jaffle.q1"));
    }

    #[test]
    fn test_build_resolves_refs() {
        let base = baseline();
        let sql = "select * from {{ ref('orders') }}";
        let ctx = RequestContext::build("q1", &encode(sql), None, &base, &config()).unwrap();
        assert_eq!(ctx.node.depends_on, vec!["model.jaffle.orders".to_string()]);
    }

    #[test]
    fn test_build_unknown_ref_fails_with_resolution_error() {
        let base = baseline();
        let sql = "select * from {{ ref('missing') }}";
        let err =
            RequestContext::build("q1", &encode(sql), None, &base, &config()).unwrap_err();
        assert_eq!(err.code(), "RESOLUTION_ERROR");
    }

    #[test]
    fn test_in_statement_macros_extend_copy_not_baseline() {
        let base = baseline();
        let sql = "{% macro twice(x) %}{{ x }} * 2{% endmacro %}select {{ twice(2) }}";
        let ctx = RequestContext::build("q1", &encode(sql), None, &base, &config()).unwrap();

        assert!(ctx.manifest.macros.contains_key("macro.jaffle.twice"));
        assert!(!base.macros.contains_key("macro.jaffle.twice"));
        assert_eq!(ctx.node.raw_sql, "select {{ twice(2) }}");
    }

    #[test]
    fn test_macro_param_and_statement_blocks_combine() {
        let base = baseline();
        let param = "{% macro helper() %}1{% endmacro %}";
        let sql = "{% macro twice(x) %}{{ x }} * 2{% endmacro %}select {{ twice(helper()) }}";
        let ctx = RequestContext::build(
            "q1",
            &encode(sql),
            Some(param),
            &base,
            &config(),
        )
        .unwrap();
        assert!(ctx.manifest.macros.contains_key("macro.jaffle.helper"));
        assert!(ctx.manifest.macros.contains_key("macro.jaffle.twice"));
    }

    #[test]
    fn test_in_statement_macro_wins_over_param() {
        let base = baseline();
        let param = "{% macro twice(x) %}param body{% endmacro %}";
        let sql = "{% macro twice(x) %}statement body{% endmacro %}select 1";
        let ctx = RequestContext::build(
            "q1",
            &encode(sql),
            Some(param),
            &base,
            &config(),
        )
        .unwrap();
        assert!(ctx.manifest.macros["macro.jaffle.twice"]
            .body
            .contains("statement body"));
    }

    #[test]
    fn test_undefined_macro_call_fails_before_merge() {
        let base = baseline();
        let sql = "select {{ not_a_macro(1) }}";
        let err =
            RequestContext::build("q1", &encode(sql), None, &base, &config()).unwrap_err();
        assert_eq!(err.code(), "RESOLUTION_ERROR");
        assert!(err.to_string().contains("not_a_macro"));
    }

    #[test]
    fn test_macro_override_body_calls_are_checked() {
        let base = baseline();
        let param = "{% macro outer() %}{{ inner_helper() }}{% endmacro %}";
        let err = RequestContext::build(
            "q1",
            &encode("select 1"),
            Some(param),
            &base,
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "RESOLUTION_ERROR");
        assert!(err.to_string().contains("inner_helper"));
    }

    #[test]
    fn test_baseline_macros_satisfy_calls() {
        let base = baseline();
        let sql = "select {{ cents_to_dollars(amount) }} from {{ ref('orders') }}";
        let ctx = RequestContext::build("q1", &encode(sql), None, &base, &config()).unwrap();
        assert_eq!(ctx.node.macros, vec!["cents_to_dollars"]);
    }

    #[test]
    fn test_malformed_statement_is_parse_error() {
        let base = baseline();
        let err = RequestContext::build(
            "q1",
            &encode("select {{ unbalanced"),
            None,
            &base,
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }
}
