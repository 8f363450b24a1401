//! Project-scope tasks: `compile`, `run`, `seed`, `test`, `docs.generate`.
//!
//! The multi-node run loops live in an external batch-task collaborator
//! behind [`ProjectRunner`]; these handlers hold that capability, route the
//! opaque blocking call through the cancellable executor so the wait stays
//! interruptible, and wrap the outcome in the response envelope.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::Receiver;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::executor::{run_on_worker, Interrupt};
use crate::registry::MethodRegistry;
use crate::result::{NodeResult, RemoteCatalogResult, RemoteResult};
use crate::task::{from_params, listify, to_response, OneOrMany, RemoteTask, ServerEnv};

pub const COMPILE: &str = "compile";
pub const RUN: &str = "run";
pub const SEED: &str = "seed";
pub const TEST: &str = "test";
pub const DOCS_GENERATE: &str = "docs.generate";

/// Node selection filters shared by the project-scope methods.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub models: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

/// Output of the external docs generator.
#[derive(Debug, Clone)]
pub struct CatalogArtifact {
    pub nodes: Value,
    pub compile_results: Option<Vec<NodeResult>>,
}

/// The external batch-task collaborator: full-project run loops, invoked
/// synchronously from this core's viewpoint. Internal parallelism (if any)
/// is its own business.
pub trait ProjectRunner: Send + Sync {
    fn compile(&self, selection: &Selection) -> anyhow::Result<Vec<NodeResult>>;
    fn run(&self, selection: &Selection) -> anyhow::Result<Vec<NodeResult>>;
    fn seed(&self, show: bool) -> anyhow::Result<Vec<NodeResult>>;
    fn test(&self, selection: &Selection, data: bool, schema: bool)
        -> anyhow::Result<Vec<NodeResult>>;
    fn docs_generate(&self, compile: bool) -> anyhow::Result<CatalogArtifact>;
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SelectionParams {
    #[serde(default)]
    models: Option<OneOrMany>,
    #[serde(default)]
    exclude: Option<OneOrMany>,
}

impl SelectionParams {
    fn into_selection(self) -> Selection {
        Selection {
            models: listify(self.models),
            exclude: listify(self.exclude),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SeedParams {
    #[serde(default)]
    show: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TestParams {
    #[serde(default)]
    models: Option<OneOrMany>,
    #[serde(default)]
    exclude: Option<OneOrMany>,
    #[serde(default)]
    data: bool,
    #[serde(default)]
    schema: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DocsGenerateParams {
    #[serde(default = "default_true")]
    compile: bool,
}

fn default_true() -> bool {
    true
}

/// Which project-scope method this task instance serves, with its
/// validated arguments.
#[derive(Debug, Clone)]
enum ProjectArgs {
    Compile(Selection),
    Run(Selection),
    Seed { show: bool },
    Test { selection: Selection, data: bool, schema: bool },
    DocsGenerate { compile: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectMethod {
    Compile,
    Run,
    Seed,
    Test,
    DocsGenerate,
}

pub struct ProjectTask {
    env: Arc<ServerEnv>,
    method: ProjectMethod,
    args: Option<ProjectArgs>,
}

pub fn compile_project_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(ProjectTask {
        env,
        method: ProjectMethod::Compile,
        args: None,
    })
}

pub fn run_project_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(ProjectTask {
        env,
        method: ProjectMethod::Run,
        args: None,
    })
}

pub fn seed_project_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(ProjectTask {
        env,
        method: ProjectMethod::Seed,
        args: None,
    })
}

pub fn test_project_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(ProjectTask {
        env,
        method: ProjectMethod::Test,
        args: None,
    })
}

pub fn docs_generate_task(env: Arc<ServerEnv>) -> Box<dyn RemoteTask> {
    Box::new(ProjectTask {
        env,
        method: ProjectMethod::DocsGenerate,
        args: None,
    })
}

impl RemoteTask for ProjectTask {
    fn method_name(&self) -> &'static str {
        match self.method {
            ProjectMethod::Compile => COMPILE,
            ProjectMethod::Run => RUN,
            ProjectMethod::Seed => SEED,
            ProjectMethod::Test => TEST,
            ProjectMethod::DocsGenerate => DOCS_GENERATE,
        }
    }

    fn set_args(&mut self, params: Value) -> Result<()> {
        let method = self.method_name();
        self.args = Some(match self.method {
            ProjectMethod::Compile => {
                let p: SelectionParams = from_params(method, params)?;
                ProjectArgs::Compile(p.into_selection())
            }
            ProjectMethod::Run => {
                let p: SelectionParams = from_params(method, params)?;
                ProjectArgs::Run(p.into_selection())
            }
            ProjectMethod::Seed => {
                let p: SeedParams = from_params(method, params)?;
                ProjectArgs::Seed { show: p.show }
            }
            ProjectMethod::Test => {
                let p: TestParams = from_params(method, params)?;
                ProjectArgs::Test {
                    selection: Selection {
                        models: listify(p.models),
                        exclude: listify(p.exclude),
                    },
                    data: p.data,
                    schema: p.schema,
                }
            }
            ProjectMethod::DocsGenerate => {
                let p: DocsGenerateParams = from_params(method, params)?;
                ProjectArgs::DocsGenerate { compile: p.compile }
            }
        });
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

        let runner = Arc::clone(&self.env.runner);
        let adapter = self.env.adapter.as_ref();
        let started = Instant::now();

        match args {
            ProjectArgs::DocsGenerate { compile } => {
                let artifact =
                    run_on_worker(adapter, interrupt, move || runner.docs_generate(compile))??;
                // The catalog stamps its own generation time and never
                // carries logs from this core.
                let envelope =
                    RemoteCatalogResult::assemble(artifact.nodes, artifact.compile_results);
                to_response(&envelope)
            }
            args => {
                let results = run_on_worker(adapter, interrupt, move || match args {
                    ProjectArgs::Compile(selection) => runner.compile(&selection),
                    ProjectArgs::Run(selection) => runner.run(&selection),
                    ProjectArgs::Seed { show } => runner.seed(show),
                    ProjectArgs::Test {
                        selection,
                        data,
                        schema,
                    } => runner.test(&selection, data, schema),
                    ProjectArgs::DocsGenerate { .. } => {
                        unreachable!("docs.generate handled above")
                    }
                })??;
                let envelope =
                    RemoteResult::assemble(results, started.elapsed(), Utc::now());
                to_response(&envelope)
            }
        }
    }
}
