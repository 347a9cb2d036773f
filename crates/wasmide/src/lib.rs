//! A library for running untrusted WebAssembly submissions in-process.
//!
//! wasmide compiles a submitted WebAssembly text module, redirects its
//! standard facility imports to sandbox substitutes by rewriting the binary,
//! loads it into a fresh namespace and runs it on a bounded worker pool
//! under a wall-clock deadline, capturing its output.
//!
//! # Features
//!
//! - **Import patching**: standard facility imports are retargeted in the binary itself.
//! - **Isolated loading**: a fresh store, linker and module for every run.
//! - **Per-run I/O**: stdin and captured output are bound to the worker thread.
//! - **Bounded concurrency**: fixed workers and a non-blocking admission queue.
//! - **TOML configuration**: pool sizing, limits and facility redirects.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Facilities, ModuleName, Redirect};
pub use runner::{CompilationUnit, CompileError, Supervisor, SupervisorError, compile};
pub use sandbox::{HostFault, LoadError, PatchError, PatchSpec, PoolError};
pub use types::{BinaryModule, Diagnostic, ExecutionOutcome, ResourceLimits, Severity};

pub mod config;
pub mod runner;
pub mod sandbox;
pub mod types;
