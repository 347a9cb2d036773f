//! Execution step for loaded programs
//!
//! Runs on a worker thread: installs the I/O context, calls the entry point
//! and sends the captured result back to the waiting request.

use tokio::sync::oneshot;
use tracing::{debug, instrument};
use wasmtime::Trap;

use crate::sandbox::io::{self, IoContext};
use crate::sandbox::{CancelToken, HostFault, Job, LoadedProgram};

/// Result of one invocation as seen from the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Captured output of a program that returned or exited
    Completed(String),

    /// Message of the fault that stopped the program
    Faulted(String),
}

/// A loaded program bound to its input, output cap and reply channel
#[derive(Debug)]
pub struct ExecutionTask {
    program: LoadedProgram,
    stdin: String,
    max_output: Option<usize>,
    cancel: CancelToken,
    reply: oneshot::Sender<RunOutcome>,
}

impl ExecutionTask {
    pub fn new(
        program: LoadedProgram,
        stdin: impl Into<String>,
        max_output: Option<usize>,
        cancel: CancelToken,
        reply: oneshot::Sender<RunOutcome>,
    ) -> Self {
        Self {
            program,
            stdin: stdin.into(),
            max_output,
            cancel,
            reply,
        }
    }

    pub fn into_job(self) -> Job {
        Box::new(move || self.run())
    }

    /// Run the program unless it was cancelled while queued
    pub fn run(self) {
        if self.cancel.is_cancelled() {
            debug!(program = self.program.name(), "skipping task cancelled while queued");
            return;
        }

        let outcome = run_program(self.program, &self.stdin, self.max_output);
        // the request may have stopped waiting
        let _ = self.reply.send(outcome);
    }
}

/// Invoke `program` inside a fresh I/O context on the current thread
#[instrument(skip_all, fields(program = program.name()))]
pub fn run_program(program: LoadedProgram, stdin: &str, max_output: Option<usize>) -> RunOutcome {
    let _context = IoContext::install(stdin, max_output);
    let result = program.invoke();
    let output = io::capture_output();

    match result {
        Ok(()) => RunOutcome::Completed(output),
        Err(err) => match err.downcast_ref::<HostFault>() {
            Some(HostFault::Exit(status)) => {
                debug!(status, "program exited");
                RunOutcome::Completed(output)
            }
            _ => {
                let message = fault_message(&err);
                debug!(%message, "program faulted");
                RunOutcome::Faulted(message)
            }
        },
    }
}

/// The fault's own message, without backtrace or context
pub fn fault_message(err: &anyhow::Error) -> String {
    if let Some(fault) = err.downcast_ref::<HostFault>() {
        return fault.to_string();
    }
    if let Some(trap) = err.downcast_ref::<Trap>() {
        return trap.to_string();
    }
    err.root_cause().to_string()
}
