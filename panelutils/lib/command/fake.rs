use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{CommandInvoker, CommandOutput, CommandSpec, PanelutilsError, PanelutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A scripted [`CommandInvoker`] for tests.
///
/// Responses are keyed by program name. Programs without a scripted response fail to spawn, the
/// same way a missing binary would on a real host.
#[derive(Debug, Default)]
pub struct FakeInvoker {
    responses: Mutex<HashMap<String, CommandOutput>>,
    installed: Mutex<HashSet<String>>,
    calls: Mutex<Vec<FakeCall>>,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    /// The spec the invoker was called with.
    pub spec: CommandSpec,

    /// The stdin contents, read at call time when the spec streamed a file.
    pub stdin: Option<Vec<u8>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeInvoker {
    /// Creates an invoker that knows no programs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the output returned for `program` and marks it as installed.
    pub fn respond(&self, program: impl Into<String>, output: CommandOutput) -> &Self {
        let program = program.into();
        self.installed.lock().unwrap().insert(program.clone());
        self.responses.lock().unwrap().insert(program, output);
        self
    }

    /// Returns every call seen so far.
    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the calls made to `program`.
    pub fn calls_to(&self, program: &str) -> Vec<FakeCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.spec.get_program() == program)
            .collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CommandInvoker for FakeInvoker {
    async fn run(&self, spec: &CommandSpec) -> PanelutilsResult<CommandOutput> {
        let stdin = match spec.get_stdin() {
            Some(path) => Some(tokio::fs::read(path).await?),
            None => None,
        };

        self.calls.lock().unwrap().push(FakeCall {
            spec: spec.clone(),
            stdin,
        });

        self.responses
            .lock()
            .unwrap()
            .get(spec.get_program())
            .cloned()
            .ok_or_else(|| PanelutilsError::CommandSpawn {
                program: spec.get_program().clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
            })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.installed
            .lock()
            .unwrap()
            .contains(program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }
}
