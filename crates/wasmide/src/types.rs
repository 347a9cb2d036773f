use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reported when the worker pool and its queue are both full
pub const SERVER_BUSY: &str = "服务器忙，请稍后提交";

/// Reported for a successful run that wrote nothing
pub const NOTHING: &str = "Nothing.";

/// Reported when the waiting request is interrupted
pub const PROGRAM_INTERRUPTED: &str = "Program interrupted.";

/// Reported when the wall clock deadline expires
pub const TIME_LIMIT_EXCEEDED: &str = "Time Limit Exceeded.";

/// Reported when a submission has no `(module $Name` declaration
pub const NO_VALID_MODULE: &str = "No valid module declaration.";

/// Fault message raised when a run writes more than its output cap
pub const OUTPUT_LIMIT_EXCEEDED: &str = "Output Limit Exceeded.";

/// Wall clock time limit in seconds when the configuration names none
pub const DEFAULT_WALL_TIME_LIMIT: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock time limit in seconds, measured from admission
    #[serde(default = "default_wall_time_limit")]
    pub wall_time_limit: Option<f64>,

    /// Linear memory limit in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Maximum captured output in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,
}

impl ResourceLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create new resource limits with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource limits with every field unset
    pub fn unset() -> Self {
        Self {
            wall_time_limit: None,
            memory_limit: None,
            max_output: None,
        }
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            max_output: overrides.max_output.or(self.max_output),
        }
    }

    /// The wall clock time limit as a duration.
    ///
    /// `None` when unset or not a positive, finite number of seconds.
    pub fn wall_time(&self) -> Option<Duration> {
        self.wall_time_limit
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
    }

    /// Memory limit in bytes, if set
    pub fn memory_limit_bytes(&self) -> Option<usize> {
        self.memory_limit
            .map(|kb| usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX))
    }

    /// Output cap in bytes, if set
    pub fn max_output_bytes(&self) -> Option<usize> {
        self.max_output
            .map(|kb| usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            wall_time_limit: default_wall_time_limit(),
            memory_limit: Some(65536), // 64 MB
            max_output: Some(1024),    // 1 MB
        }
    }
}

fn default_wall_time_limit() -> Option<f64> {
    Some(DEFAULT_WALL_TIME_LIMIT)
}

/// Severity of a compiler diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,

    /// 1-based source line
    pub line: usize,

    pub message: String,
}

impl Diagnostic {
    pub fn error(line: usize, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            line,
            message: message.into(),
        }
    }

    /// The user-facing line for this diagnostic
    pub fn summary(&self) -> String {
        format!("Compilation error on line {}.", self.line)
    }
}

/// A compiled WebAssembly module together with the name it was declared under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryModule {
    name: String,
    bytes: Vec<u8>,
}

impl BinaryModule {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replace the module bytes, keeping the name
    pub fn with_bytes(self, bytes: Vec<u8>) -> Self {
        Self { bytes, ..self }
    }
}

/// Terminal result of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The entry function returned (or the program exited); holds captured output
    Completed(String),

    /// The compiler reported diagnostics
    CompileFailed(Vec<Diagnostic>),

    /// The submission has no module declaration
    InputRejected,

    /// The worker pool and its queue were full
    Rejected,

    /// The wall clock deadline expired
    TimedOut,

    /// The program (or its loading) faulted; holds the fault message only
    Faulted(String),

    /// The waiting request was interrupted
    Interrupted,
}

impl ExecutionOutcome {
    /// Render the outcome as the text returned to the caller
    pub fn render(&self) -> String {
        match self {
            ExecutionOutcome::Completed(output) if output.is_empty() => NOTHING.to_owned(),
            ExecutionOutcome::Completed(output) => output.clone(),
            ExecutionOutcome::CompileFailed(diagnostics) => {
                let mut text = String::new();
                for diagnostic in diagnostics {
                    text.push_str(&diagnostic.summary());
                    text.push('\n');
                }
                text
            }
            ExecutionOutcome::InputRejected => NO_VALID_MODULE.to_owned(),
            ExecutionOutcome::Rejected => SERVER_BUSY.to_owned(),
            ExecutionOutcome::TimedOut => TIME_LIMIT_EXCEEDED.to_owned(),
            ExecutionOutcome::Faulted(message) => message.clone(),
            ExecutionOutcome::Interrupted => PROGRAM_INTERRUPTED.to_owned(),
        }
    }

    /// Check if the program ran to completion
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed(_))
    }
}
