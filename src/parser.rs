//! Parsers for request-supplied source text.
//!
//! Two small parsers live here: one that turns a macros text into
//! [`MacroDef`]s, and one that turns a split statement into the request's
//! single ad-hoc node. Full template compilation belongs to the external
//! compiler; this layer only extracts the structure the graph merge needs
//! (names, `ref(...)` targets, candidate macro calls) and rejects source it
//! can tell is malformed.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::config::RuntimeConfig;
use crate::error::{Result, RpcError};
use crate::manifest::{MacroDef, ManifestNode, NodeKind};
use crate::splitter::{extract_toplevel_blocks, BlockKind};

/// Template calls that are part of the language, not user macros.
const BUILTIN_CALLS: &[&str] = &["ref", "source", "config", "var", "env_var", "log", "return"];

fn macro_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{%-?\s*macro\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("macro header regex")
    })
}

fn ref_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"ref\s*\(\s*['"]([^'"]+)['"](?:\s*,\s*['"]([^'"]+)['"])?\s*\)"#)
            .expect("ref call regex")
    })
}

fn macro_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("macro call regex")
    })
}

/// Parse a macros text into macro definitions.
///
/// The text is expected to be nothing but `{% macro %}...{% endmacro %}`
/// blocks (plus whitespace); anything else is a parse error. Definition order
/// is preserved so that callers can apply last-write-wins keying.
pub fn parse_macros(source: &str, config: &RuntimeConfig) -> Result<Vec<MacroDef>> {
    if source.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut defs = Vec::new();
    for block in extract_toplevel_blocks(source) {
        match block.kind {
            BlockKind::Data => {
                if !block.text.trim().is_empty() {
                    return Err(RpcError::Parse(format!(
                        "macros text may only contain macro definitions, found: {:?}",
                        block.text.trim()
                    )));
                }
            }
            BlockKind::Macro => {
                let name = macro_header_re()
                    .captures(&block.text)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .ok_or_else(|| {
                        RpcError::Parse(
                            "macro definition is missing a valid name".to_string(),
                        )
                    })?;
                if !block.text.contains("endmacro") {
                    return Err(RpcError::Parse(format!(
                        "macro '{}' is missing its endmacro tag",
                        name
                    )));
                }
                defs.push(MacroDef {
                    unique_id: format!("macro.{}.{}", config.project_name, name),
                    name,
                    package: config.project_name.clone(),
                    body: block.text,
                });
            }
        }
    }

    Ok(defs)
}

/// Parse a split statement into the request's ad-hoc node.
///
/// The node is immutable once constructed; its `depends_on` stays empty until
/// the graph merge resolves it.
pub fn parse_adhoc_node(
    name: &str,
    statement: &str,
    config: &RuntimeConfig,
) -> Result<ManifestNode> {
    validate_node_name(name)?;
    check_balanced_delimiters(statement)?;

    Ok(ManifestNode {
        unique_id: format!("rpc.{}.{}", config.project_name, name),
        name: name.to_string(),
        package: config.project_name.clone(),
        kind: NodeKind::RpcCall,
        raw_sql: statement.to_string(),
        refs: extract_refs(statement),
        macros: extract_macro_calls(statement),
        depends_on: Vec::new(),
    })
}

/// Target node names of every `ref(...)` call, deduplicated in source order.
/// Two-argument refs (`ref('package', 'name')`) target the second argument.
pub fn extract_refs(text: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for caps in ref_call_re().captures_iter(text) {
        let target = caps
            .get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(target) = target {
            if !refs.contains(&target) {
                refs.push(target);
            }
        }
    }
    refs
}

/// Bare names of `{{ name(...) }}` calls that are not builtins, deduplicated
/// in source order. These are the macros the statement may reference.
pub fn extract_macro_calls(text: &str) -> Vec<String> {
    let mut calls: Vec<String> = Vec::new();
    for caps in macro_call_re().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let name = m.as_str();
            if !BUILTIN_CALLS.contains(&name) && !calls.iter().any(|c| c == name) {
                calls.push(name.to_string());
            }
        }
    }
    calls
}

fn validate_node_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(RpcError::Parse(
            "request name must be 1-128 characters".to_string(),
        ));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(RpcError::Parse(format!(
            "request name '{}' may only contain a-z, A-Z, 0-9, _, -",
            name
        )));
    }
    Ok(())
}

fn check_balanced_delimiters(statement: &str) -> Result<()> {
    let count = |needle: &str| statement.matches(needle).count();
    if count("{{") != count("}}") || count("{%") != count("%}") {
        return Err(RpcError::Parse(
            "unbalanced template delimiters in statement".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig::new("jaffle")
    }

    #[test]
    fn test_parse_macros_empty_text() {
        assert!(parse_macros("", &config()).unwrap().is_empty());
        assert!(parse_macros("  \n ", &config()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_macros_assigns_qualified_ids() {
        let source = "{% macro one() %}1{% endmacro %}\n{% macro two(x) %}{{ x }}{% endmacro %}";
        let defs = parse_macros(source, &config()).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].unique_id, "macro.jaffle.one");
        assert_eq!(defs[1].unique_id, "macro.jaffle.two");
        assert_eq!(defs[1].package, "jaffle");
    }

    #[test]
    fn test_parse_macros_rejects_nameless_definition() {
        let err = parse_macros("{% macro %}1{% endmacro %}", &config()).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_parse_macros_rejects_unterminated_definition() {
        let err = parse_macros("{% macro broken() %}1", &config()).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_parse_macros_rejects_stray_content() {
        let err =
            parse_macros("select 1 {% macro m() %}1{% endmacro %}", &config()).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_adhoc_node_identity() {
        let node = parse_adhoc_node("q1", "select 1 as id", &config()).unwrap();
        assert_eq!(node.unique_id, "rpc.jaffle.q1");
        assert_eq!(node.name, "q1");
        assert_eq!(node.kind, NodeKind::RpcCall);
        assert_eq!(node.raw_sql, "select 1 as id");
        assert!(node.refs.is_empty());
        assert!(node.depends_on.is_empty());
    }

    #[test]
    fn test_adhoc_node_collects_refs() {
        let sql = "select * from {{ ref('orders') }} join {{ ref(\"customers\") }} using (id)";
        let node = parse_adhoc_node("q1", sql, &config()).unwrap();
        assert_eq!(node.refs, vec!["orders", "customers"]);
    }

    #[test]
    fn test_two_argument_ref_targets_second() {
        let refs = extract_refs("{{ ref('ext_package', 'orders') }}");
        assert_eq!(refs, vec!["orders"]);
    }

    #[test]
    fn test_duplicate_refs_deduplicated_in_order() {
        let refs = extract_refs("{{ ref('b') }} {{ ref('a') }} {{ ref('b') }}");
        assert_eq!(refs, vec!["b", "a"]);
    }

    #[test]
    fn test_macro_calls_skip_builtins() {
        let sql = "select {{ cents_to_dollars(amount) }} from {{ ref('orders') }} where {{ config(alias='x') }}";
        let calls = extract_macro_calls(sql);
        assert_eq!(calls, vec!["cents_to_dollars"]);
    }

    #[test]
    fn test_rejects_invalid_name() {
        assert!(parse_adhoc_node("", "select 1", &config()).is_err());
        assert!(parse_adhoc_node("bad name", "select 1", &config()).is_err());
        assert!(parse_adhoc_node("ok-name_1", "select 1", &config()).is_ok());
    }

    #[test]
    fn test_rejects_unbalanced_delimiters() {
        let err = parse_adhoc_node("q1", "select {{ broken", &config()).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
        assert!(err.to_string().contains("unbalanced"));
    }
}
