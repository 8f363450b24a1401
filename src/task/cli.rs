//! The `cli_args` meta-task.
//!
//! Accepts one shell-style command line, parses it with the same grammar as
//! the process's own entry point, maps the parsed invocation to a target
//! method, and delegates to that method's handler through the registry. One
//! RPC method acting as a generic "run any CLI-shaped command" trampoline.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, RpcError};
use crate::executor::Interrupt;
use crate::registry::MethodRegistry;
use crate::task::{from_params, project, RemoteTask, ServerEnv};

pub const CLI_ARGS: &str = "cli_args";

#[derive(Debug, Clone, Deserialize)]
pub struct CliParams {
    pub cli: String,
}

/// The CLI grammar, shared in shape with the command-line entry point.
#[derive(Debug, Parser)]
#[command(name = "quarry", no_binary_name = true)]
struct CliRequest {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Compile selected models without executing them
    Compile {
        #[arg(long, num_args = 1..)]
        models: Option<Vec<String>>,
        #[arg(long, num_args = 1..)]
        exclude: Option<Vec<String>>,
    },
    /// Run selected models
    Run {
        #[arg(long, num_args = 1..)]
        models: Option<Vec<String>>,
        #[arg(long, num_args = 1..)]
        exclude: Option<Vec<String>>,
    },
    /// Load seed data
    Seed {
        #[arg(long)]
        show: bool,
    },
    /// Run data and/or schema tests
    Test {
        #[arg(long)]
        data: bool,
        #[arg(long)]
        schema: bool,
        #[arg(long, num_args = 1..)]
        models: Option<Vec<String>>,
        #[arg(long, num_args = 1..)]
        exclude: Option<Vec<String>>,
    },
    /// Documentation commands
    Docs {
        #[command(subcommand)]
        command: DocsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DocsCommand {
    /// Generate the documentation catalog
    Generate {
        #[arg(long)]
        no_compile: bool,
    },
}

impl CliCommand {
    /// Map the parsed invocation to its target method and parameter object.
    fn into_invocation(self) -> (&'static str, Value) {
        match self {
            CliCommand::Compile { models, exclude } => (
                project::COMPILE,
                json!({"models": models, "exclude": exclude}),
            ),
            CliCommand::Run { models, exclude } => (
                project::RUN,
                json!({"models": models, "exclude": exclude}),
            ),
            CliCommand::Seed { show } => (project::SEED, json!({"show": show})),
            CliCommand::Test {
                data,
                schema,
                models,
                exclude,
            } => (
                project::TEST,
                json!({
                    "data": data,
                    "schema": schema,
                    "models": models,
                    "exclude": exclude,
                }),
            ),
            CliCommand::Docs {
                command: DocsCommand::Generate { no_compile },
            } => (project::DOCS_GENERATE, json!({"compile": !no_compile})),
        }
    }
}

pub struct CliTask {
    env: Arc<ServerEnv>,
    args: Option<CliParams>,
}

pub fn cli_args_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(CliTask { env, args: None })
}

impl RemoteTask for CliTask {
    fn method_name(&self) -> &'static str {
        CLI_ARGS
    }

    fn set_args(&mut self, params: Value) -> Result<()> {
        self.args = Some(from_params(CLI_ARGS, params)?);
        Ok(())
    }

    fn handle_request(
        &mut self,
        registry: &MethodRegistry,
        interrupt: &Receiver<Interrupt>,
    ) -> Result<Value> {
        let args = self
            .args
            .take()
            .ok_or_else(|| RpcError::Internal("handle_request called before set_args".into()))?;

        let argv = shlex::split(&args.cli).ok_or_else(|| {
            RpcError::Parse(format!("cli string is not shell-lexable: {:?}", args.cli))
        })?;
        let parsed = CliRequest::try_parse_from(argv)
            .map_err(|e| RpcError::Parse(format!("invalid cli invocation: {}", e)))?;

        let (method, params) = parsed.command.into_invocation();

        // Target resolution goes through the same registry as direct calls;
        // a missing target is a server bug, not a user error.
        let factory = registry.resolve(method)?;
        let mut task = factory(Arc::clone(&self.env));
        task.set_args(params)?;
        task.handle_request(registry, interrupt)
    }
}
