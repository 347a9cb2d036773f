//! Isolated loading of patched modules
//!
//! Every load compiles the bytes into a fresh [`Module`] and pairs it with a
//! fresh [`Store`] and [`Linker`]. Nothing is cached between loads, so two
//! programs never share a namespace even when their bytes are identical.

use thiserror::Error;
use tracing::{debug, instrument};
use wasmtime::{
    Engine, ExternType, InstancePre, Linker, Module, Store, StoreLimits, StoreLimitsBuilder,
    UpdateDeadline,
};

use crate::config::Facilities;
use crate::sandbox::{CancelToken, HostFault, host};
use crate::types::BinaryModule;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid module: {0}")]
    Invalid(String),

    #[error("failed to set up sandbox facilities: {0}")]
    Setup(String),

    #[error("link error: {0}")]
    Link(String),

    #[error("no entry point: module does not export a function named `{0}`")]
    NoEntryPoint(String),

    #[error("entry point `{0}` must take no parameters and return nothing")]
    EntrySignature(String),
}

/// Per-store data: resource limits and the cancellation flag
pub struct SandboxState {
    limits: StoreLimits,
    cancel: CancelToken,
}

impl SandboxState {
    pub fn new(memory_limit: Option<usize>, cancel: CancelToken) -> Self {
        let mut limits = StoreLimitsBuilder::new().instances(1);
        if let Some(bytes) = memory_limit {
            limits = limits.memory_size(bytes);
        }
        Self {
            limits: limits.build(),
            cancel,
        }
    }

    /// State with no memory limit and a token nobody cancels
    pub fn unlimited() -> Self {
        Self::new(None, CancelToken::new())
    }
}

impl std::fmt::Debug for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxState")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// Settings for one load
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Name of the exported function to invoke
    pub entry_point: String,
    /// Linear memory cap in bytes
    pub memory_limit: Option<usize>,
    pub cancel: CancelToken,
}

impl LoadOptions {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            memory_limit: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A linked program ready to be invoked once
pub struct LoadedProgram {
    name: String,
    entry_point: String,
    store: Store<SandboxState>,
    instance: InstancePre<SandboxState>,
}

impl LoadedProgram {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Instantiate the module and call its entry point.
    ///
    /// Runs a `start` function too, so this belongs inside the I/O context
    /// of the invoking thread.
    pub fn invoke(mut self) -> anyhow::Result<()> {
        let instance = self.instance.instantiate(&mut self.store)?;
        let entry = instance.get_typed_func::<(), ()>(&mut self.store, &self.entry_point)?;
        entry.call(&mut self.store, ())
    }
}

impl std::fmt::Debug for LoadedProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedProgram")
            .field("name", &self.name)
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}

/// Load `module` into a fresh namespace that can only see the substitutes
#[instrument(skip_all, fields(module = module.name()))]
pub fn load(
    engine: &Engine,
    module: &BinaryModule,
    facilities: &Facilities,
    options: LoadOptions,
) -> Result<LoadedProgram, LoadError> {
    let compiled =
        Module::new(engine, module.bytes()).map_err(|err| LoadError::Invalid(format!("{err:#}")))?;

    match compiled.get_export(&options.entry_point) {
        Some(ExternType::Func(ty)) if ty.params().len() == 0 && ty.results().len() == 0 => {}
        Some(ExternType::Func(_)) => return Err(LoadError::EntrySignature(options.entry_point)),
        _ => return Err(LoadError::NoEntryPoint(options.entry_point)),
    }

    let mut linker = Linker::new(engine);
    host::define_substitutes(&mut linker, facilities)
        .map_err(|err| LoadError::Setup(format!("{err:#}")))?;
    let instance = linker
        .instantiate_pre(&compiled)
        .map_err(|err| LoadError::Link(format!("{err:#}")))?;

    let mut store = Store::new(
        engine,
        SandboxState::new(options.memory_limit, options.cancel),
    );
    store.limiter(|state| &mut state.limits);
    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(|context| {
        if context.data().cancel.is_cancelled() {
            Err(HostFault::Cancelled.into())
        } else {
            Ok(UpdateDeadline::Continue(1))
        }
    });

    debug!(entry_point = %options.entry_point, "module loaded");
    Ok(LoadedProgram {
        name: module.name().to_owned(),
        entry_point: options.entry_point,
        store,
        instance,
    })
}
