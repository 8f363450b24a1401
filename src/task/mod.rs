//! RPC task handlers.
//!
//! One handler instance serves exactly one request: it is constructed by its
//! registry factory, validated with `set_args`, run once with
//! `handle_request`, and dropped. Handlers share the process-wide baseline
//! through [`ServerEnv`]; anything request-scoped they build themselves.

pub mod cli;
pub mod exec;
pub mod project;

use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::{Adapter, SqlCompiler};
use crate::config::RuntimeConfig;
use crate::error::{Result, RpcError};
use crate::executor::Interrupt;
use crate::manifest::Manifest;
use crate::registry::{MethodRegistry, TaskFactory};
use crate::task::project::ProjectRunner;

/// Process-wide state shared by every handler, read-only per request.
pub struct ServerEnv {
    pub config: RuntimeConfig,
    /// Baseline metadata graph; requests derive private copies, never
    /// mutate this one.
    pub manifest: Arc<Manifest>,
    pub adapter: Arc<dyn Adapter>,
    pub compiler: Arc<dyn SqlCompiler>,
    pub runner: Arc<dyn ProjectRunner>,
}

/// A per-request RPC handler.
pub trait RemoteTask: Send {
    fn method_name(&self) -> &'static str;

    /// Validate and store the request parameters. Fails with a user-facing
    /// parse error on malformed parameters.
    fn set_args(&mut self, params: Value) -> Result<()>;

    /// Execute the request and serialize its response envelope. The registry
    /// is available so meta-methods can re-dispatch.
    fn handle_request(
        &mut self,
        registry: &MethodRegistry,
        interrupt: &Receiver<Interrupt>,
    ) -> Result<Value>;
}

/// All built-in handler factories, keyed by method name. The registry is
/// populated from this table once at construction.
pub(crate) fn builtin_factories() -> Vec<(&'static str, TaskFactory)> {
    vec![
        (exec::COMPILE_SQL, exec::compile_sql_task),
        (exec::RUN_SQL, exec::run_sql_task),
        (project::COMPILE, project::compile_project_task),
        (project::RUN, project::run_project_task),
        (project::SEED, project::seed_project_task),
        (project::TEST, project::test_project_task),
        (project::DOCS_GENERATE, project::docs_generate_task),
        (cli::CLI_ARGS, cli::cli_args_task),
    ]
}

/// A parameter that accepts either one string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Normalize a one-or-many parameter into a plain list.
pub(crate) fn listify(value: Option<OneOrMany>) -> Option<Vec<String>> {
    value.map(|v| match v {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(items) => items,
    })
}

/// Deserialize method parameters, treating absent params as an empty object
/// so methods whose fields all have defaults accept a bare call.
pub(crate) fn from_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| RpcError::Parse(format!("invalid parameters for {}: {}", method, e)))
}

/// Serialize a response envelope.
pub(crate) fn to_response<T: serde::Serialize>(envelope: &T) -> Result<Value> {
    serde_json::to_value(envelope)
        .map_err(|e| RpcError::Internal(format!("failed to serialize response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listify_accepts_one_or_many() {
        let one: Option<OneOrMany> = serde_json::from_value(serde_json::json!("a")).unwrap();
        assert_eq!(listify(one), Some(vec!["a".to_string()]));

        let many: Option<OneOrMany> =
            serde_json::from_value(serde_json::json!(["a", "b"])).unwrap();
        assert_eq!(
            listify(many),
            Some(vec!["a".to_string(), "b".to_string()])
        );

        assert_eq!(listify(None), None);
    }

    #[test]
    fn test_from_params_null_means_empty_object() {
        #[derive(Debug, Deserialize)]
        struct P {
            #[serde(default)]
            show: bool,
        }
        let p: P = from_params("seed", Value::Null).unwrap();
        assert!(!p.show);
    }

    #[test]
    fn test_from_params_reports_method_name() {
        #[derive(Debug, Deserialize)]
        struct P {
            #[allow(dead_code)]
            name: String,
        }
        let err = from_params::<P>("compile_sql", serde_json::json!({})).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
        assert!(err.to_string().contains("compile_sql"));
    }
}
