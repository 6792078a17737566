//! Recording process runner for unit tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ExecutionResult, ProcessRequest, ProcessRunner};

/// One process invocation seen by [`RecordingRunner`]
#[derive(Debug, Clone)]
pub struct Call {
    pub binary: String,
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    pub at: Instant,
    pub detached: bool,
}

type Responder = Box<dyn Fn(&ProcessRequest) -> ExecutionResult + Send + Sync>;

/// Fake runner that records every request and answers through a closure
pub struct RecordingRunner {
    calls: Mutex<Vec<Call>>,
    responder: Responder,
    yields: bool,
}

impl RecordingRunner {
    pub fn new(
        responder: impl Fn(&ProcessRequest) -> ExecutionResult + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            yields: false,
        })
    }

    /// Like [`RecordingRunner::new`], but every call yields to the scheduler
    /// before answering so concurrent callers interleave
    pub fn yielding(
        responder: impl Fn(&ProcessRequest) -> ExecutionResult + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            yields: true,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Argument vectors of all calls, in order
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|c| c.argv).collect()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, request: ProcessRequest) -> ExecutionResult {
        self.calls.lock().unwrap().push(Call {
            binary: request.binary.clone(),
            argv: request.argv.clone(),
            stdin: request.stdin.clone(),
            at: Instant::now(),
            detached: false,
        });
        if self.yields {
            tokio::task::yield_now().await;
        }
        (self.responder)(&request)
    }

    async fn spawn_detached(&self, binary: &str, argv: &[String]) -> std::io::Result<u32> {
        self.calls.lock().unwrap().push(Call {
            binary: binary.to_string(),
            argv: argv.to_vec(),
            stdin: None,
            at: Instant::now(),
            detached: true,
        });
        Ok(4242)
    }
}

/// Successful result with `stdout`
pub fn ok(stdout: &str) -> ExecutionResult {
    ExecutionResult::completed("test", 0, stdout.as_bytes().to_vec(), Vec::new(), false)
}

/// Failed result with `exit_code` and `stderr`
pub fn fail(exit_code: i32, stderr: &str) -> ExecutionResult {
    ExecutionResult::completed("test", exit_code, Vec::new(), stderr.as_bytes().to_vec(), false)
}
