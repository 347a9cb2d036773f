//! Execution supervisor for wasmide
//!
//! Drives a submission through compilation, import patching and isolated
//! loading, then runs it on the worker pool under a wall-clock deadline.
//! Every failure ends as an [`ExecutionOutcome`]; nothing here is fatal to
//! the process.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};
use wasmtime::Engine;

pub use crate::runner::compile::{CompilationUnit, compile, extract_module_name};
pub use crate::runner::execute::{ExecutionTask, RunOutcome, fault_message, run_program};

mod compile;
mod execute;

use crate::{
    config::{Config, ConfigError},
    sandbox::{
        CancelToken, EpochTicker, LoadOptions, PatchError, PoolError, WorkerPool, load, patch,
    },
    types::{BinaryModule, Diagnostic, ExecutionOutcome, ResourceLimits},
};

/// Errors that occur during compilation
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no valid module declaration")]
    InputRejected,

    #[error("compilation failed with {} diagnostic(s)", .0.len())]
    Diagnostics(Vec<Diagnostic>),
}

/// Errors that occur while starting a supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create wasm engine: {0}")]
    Engine(String),

    #[error("failed to start epoch ticker: {0}")]
    Ticker(#[source] std::io::Error),

    #[error("failed to start worker pool: {0}")]
    Pool(#[from] PoolError),
}

/// Message reported when a worker drops a task without replying
const EXECUTION_ABORTED: &str = "execution aborted";

/// High-level runner for submitted programs
pub struct Supervisor {
    config: Config,
    engine: Engine,
    pool: WorkerPool,

    /// Configured wall clock limit, used when a request names no valid one
    deadline: Duration,

    shutdown: watch::Sender<bool>,
    _ticker: EpochTicker,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("deadline", &self.deadline)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor with its own engine, ticker and worker pool
    #[instrument(skip(config))]
    pub fn new(config: Config) -> Result<Self, SupervisorError> {
        config.validate()?;
        let deadline = config.limits.wall_time().ok_or_else(|| {
            ConfigError::Invalid("limits.wall_time_limit must be a positive number".to_owned())
        })?;

        let mut engine_config = wasmtime::Config::new();
        engine_config.epoch_interruption(true);
        let engine = Engine::new(&engine_config)
            .map_err(|err| SupervisorError::Engine(format!("{err:#}")))?;

        let ticker =
            EpochTicker::start(engine.clone(), config.epoch_tick()).map_err(SupervisorError::Ticker)?;
        let pool = WorkerPool::new(config.pool.workers, config.pool.queue_capacity)?;
        let (shutdown, _) = watch::channel(false);

        info!(
            workers = pool.workers(),
            queue_capacity = pool.queue_capacity(),
            ?deadline,
            "supervisor started"
        );
        Ok(Self {
            config,
            engine,
            pool,
            deadline,
            shutdown,
            _ticker: ticker,
        })
    }

    /// Create a supervisor with the default configuration
    pub fn with_defaults() -> Result<Self, SupervisorError> {
        Self::new(Config::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a submission and render its outcome as text. Never fails.
    pub async fn execute_program(&self, source: &str, stdin: &str) -> String {
        self.execute(source, stdin).await.render()
    }

    /// Run a submission with the configured limits
    pub async fn execute(&self, source: &str, stdin: &str) -> ExecutionOutcome {
        self.execute_with_limits(source, stdin, None).await
    }

    /// Run a submission, overriding some of the configured limits
    #[instrument(skip_all, fields(source_len = source.len(), stdin_len = stdin.len()))]
    pub async fn execute_with_limits(
        &self,
        source: &str,
        stdin: &str,
        limits: Option<&ResourceLimits>,
    ) -> ExecutionOutcome {
        let limits = self.config.effective_limits(limits);

        if self.is_shut_down() {
            debug!("refusing submission after shutdown");
            return ExecutionOutcome::Interrupted;
        }

        let module = match compile::compile(source) {
            Ok(module) => module,
            Err(CompileError::InputRejected) => {
                debug!("no module declaration");
                return ExecutionOutcome::InputRejected;
            }
            Err(CompileError::Diagnostics(diagnostics)) => {
                debug!(count = diagnostics.len(), "compilation failed");
                return ExecutionOutcome::CompileFailed(diagnostics);
            }
        };

        let module = match self.patch(module) {
            Ok(module) => module,
            Err(err) => {
                warn!(%err, "patching failed");
                return ExecutionOutcome::Faulted(err.to_string());
            }
        };

        let cancel = CancelToken::new();
        let options = LoadOptions::new(&self.config.entry_point)
            .with_memory_limit(limits.memory_limit_bytes())
            .with_cancel(cancel.clone());
        let program = match load(&self.engine, &module, &self.config.facilities, options) {
            Ok(program) => program,
            Err(err) => {
                debug!(%err, "loading failed");
                return ExecutionOutcome::Faulted(err.to_string());
            }
        };

        let (reply, result) = oneshot::channel();
        let task = ExecutionTask::new(
            program,
            stdin,
            limits.max_output_bytes(),
            cancel.clone(),
            reply,
        );
        let _cancel_on_exit = cancel.cancel_on_drop();
        match self.pool.try_submit(task.into_job()) {
            Ok(()) => debug!(module = module.name(), "queued"),
            Err(PoolError::Saturated) => {
                warn!("worker pool saturated, rejecting submission");
                return ExecutionOutcome::Rejected;
            }
            Err(err) => {
                debug!(%err, "worker pool unavailable");
                return ExecutionOutcome::Interrupted;
            }
        }

        let outcome = self.wait(result, self.deadline(&limits)).await;
        debug!(?outcome, "reported");
        outcome
    }

    /// Stop accepting work and interrupt every waiting request
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.pool.close();
        info!("supervisor shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Retarget the standard facility imports to their substitutes
    fn patch(&self, module: BinaryModule) -> Result<BinaryModule, PatchError> {
        let mut module = module;
        for spec in self.config.facilities.patches() {
            let bytes = spec.apply(module.bytes())?;
            module = module.with_bytes(bytes);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let imports: Vec<_> = patch::scan_imports(module.bytes())?
                .into_iter()
                .map(|import| format!("{}::{}", import.module, import.field))
                .collect();
            debug!(?imports, "patched");
        }
        Ok(module)
    }

    /// The request's wall clock limit, or the configured one if it is not usable
    fn deadline(&self, limits: &ResourceLimits) -> Duration {
        limits.wall_time().unwrap_or(self.deadline)
    }

    async fn wait(
        &self,
        result: oneshot::Receiver<RunOutcome>,
        deadline: Duration,
    ) -> ExecutionOutcome {
        let mut shutdown = self.shutdown.subscribe();

        tokio::select! {
            finished = tokio::time::timeout(deadline, result) => match finished {
                Err(_) => ExecutionOutcome::TimedOut,
                Ok(Ok(RunOutcome::Completed(output))) => ExecutionOutcome::Completed(output),
                Ok(Ok(RunOutcome::Faulted(message))) => ExecutionOutcome::Faulted(message),
                Ok(Err(_)) => ExecutionOutcome::Faulted(EXECUTION_ABORTED.to_owned()),
            },
            _ = shutdown.wait_for(|stopped| *stopped) => ExecutionOutcome::Interrupted,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.pool.close();
    }
}
