//! In-process WebAssembly sandbox
//!
//! This module holds the pieces a compiled program passes through on its way
//! to running: import rewriting, isolated loading, the substitute standard
//! facilities, per-thread I/O capture and the worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

pub use crate::sandbox::io::{InputCursor, IoContext, IoGuard};
pub use crate::sandbox::loader::{LoadError, LoadOptions, LoadedProgram, SandboxState, load};
pub use crate::sandbox::patch::{ImportEntry, ImportKind, PatchError, PatchSpec};
pub use crate::sandbox::pool::{Job, PoolError, WorkerPool};
pub use crate::sandbox::ticker::EpochTicker;

pub mod host;
pub mod io;
mod loader;
pub mod patch;
mod pool;
mod ticker;

/// Faults raised by the substitute facilities while a program runs
#[derive(Debug, Error)]
pub enum HostFault {
    /// Raised by the program itself; the message is reported verbatim
    #[error("{0}")]
    Raised(String),

    /// The program asked to exit; not a failure
    #[error("program exited with status {0}")]
    Exit(i32),

    #[error("no more input")]
    NoSuchElement,

    #[error("no line found")]
    NoLineFound,

    #[error("input mismatch: {token:?} is not a valid {expected}")]
    InputMismatch {
        token: String,
        expected: &'static str,
    },

    #[error("Output Limit Exceeded.")]
    OutputLimitExceeded,

    #[error("program does not export a linear memory named `memory`")]
    MissingMemory,

    #[error("memory access out of bounds")]
    OutOfBounds,

    #[error("execution cancelled")]
    Cancelled,

    #[error("I/O context is not installed on this thread")]
    NoContext,
}

/// Shared flag used to ask a running program to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel this token when the returned guard is dropped
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// Cancels its token when dropped, however the owning scope is left
#[derive(Debug)]
#[must_use = "the token is cancelled as soon as the guard is dropped"]
pub struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
