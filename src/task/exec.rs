//! Ad-hoc statement tasks: `compile_sql` and `run_sql`.
//!
//! Both build an ephemeral context for the caller's statement and run exactly
//! one node on a dedicated worker. They differ only in runner kind: compile
//! renders the statement, execute renders and then runs it on the adapter.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::Receiver;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{Adapter, SqlCompiler};
use crate::context::RequestContext;
use crate::error::{Result, RpcError};
use crate::executor::{run_on_worker, Interrupt};
use crate::manifest::{Manifest, ManifestNode};
use crate::registry::MethodRegistry;
use crate::result::{NodeResult, NodeStatus, RemoteResult, RunState};
use crate::task::{from_params, to_response, RemoteTask, ServerEnv};

pub const COMPILE_SQL: &str = "compile_sql";
pub const RUN_SQL: &str = "run_sql";

#[derive(Debug, Clone, Deserialize)]
pub struct ExecParams {
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub macros: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecKind {
    /// Render only; nothing touches the backend.
    Compile,
    /// Render, then execute the rendered statement on the adapter.
    Execute,
}

pub struct ExecTask {
    env: Arc<ServerEnv>,
    kind: ExecKind,
    args: Option<ExecParams>,
}

pub fn compile_sql_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(ExecTask {
        env,
        kind: ExecKind::Compile,
        args: None,
    })
}

pub fn run_sql_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(ExecTask {
        env,
        kind: ExecKind::Execute,
        args: None,
    })
}

impl RemoteTask for ExecTask {
    fn method_name(&self) -> &'static str {
        match self.kind {
            ExecKind::Compile => COMPILE_SQL,
            ExecKind::Execute => RUN_SQL,
        }
    }

    fn set_args(&mut self, params: Value) -> Result<()> {
        self.args = Some(from_params(self.method_name(), params)?);
        Ok(())
    }

    fn handle_request(
        &mut self,
        _registry: &MethodRegistry,
        interrupt: &Receiver<Interrupt>,
    ) -> Result<Value> {
        let args = self
            .args
            .take()
            .ok_or_else(|| RpcError::Internal("handle_request called before set_args".into()))?;

        let started = Instant::now();

        // Parse and resolution failures abort here, before any worker exists.
        let ctx = RequestContext::build(
            &args.name,
            &args.sql,
            args.macros.as_deref(),
            &self.env.manifest,
            &self.env.config,
        )?;

        let kind = self.kind;
        let compiler = Arc::clone(&self.env.compiler);
        let adapter = Arc::clone(&self.env.adapter);

        let state = run_on_worker(self.env.adapter.as_ref(), interrupt, move || {
            let mut state = RunState::new(1);
            state
                .node_results
                .push(safe_run(kind, &ctx.node, &ctx.manifest, &*compiler, &*adapter));
            state.run_count += 1;
            state
        })?;

        let envelope = RemoteResult::assemble(state.node_results, started.elapsed(), Utc::now());
        to_response(&envelope)
    }
}

/// Run one node, capturing expected failures (compile or backend errors)
/// into the node result. Only a panic escapes this function, and the
/// executor turns that into an execution error on the coordinating side.
fn safe_run(
    kind: ExecKind,
    node: &ManifestNode,
    manifest: &Manifest,
    compiler: &dyn SqlCompiler,
    adapter: &dyn Adapter,
) -> NodeResult {
    let started = Instant::now();
    let outcome = compiler.compile(node, manifest).and_then(|compiled| {
        let table = match kind {
            ExecKind::Compile => None,
            ExecKind::Execute => Some(adapter.execute(&compiled)?),
        };
        Ok((compiled, table))
    });

    match outcome {
        Ok((compiled, table)) => NodeResult {
            unique_id: node.unique_id.clone(),
            status: NodeStatus::Success,
            message: None,
            compiled_sql: Some(compiled),
            table,
            execution_time: started.elapsed().as_secs_f64(),
        },
        Err(e) => {
            debug!("node {} failed: {:#}", node.unique_id, e);
            NodeResult {
                unique_id: node.unique_id.clone(),
                status: NodeStatus::Error,
                message: Some(format!("{:#}", e)),
                compiled_sql: None,
                table: None,
                execution_time: started.elapsed().as_secs_f64(),
            }
        }
    }
}
