//! Interpreter configuration.
//!
//! The configuration is read when the worker thread starts; changing it while
//! an interpreter is running only affects the next start.

use std::env;

/// Default name of the thread that owns the interpreter.
pub const DEFAULT_THREAD_NAME: &str = "pyrun-interpreter";

const ENV_THREAD_NAME: &str = "PYRUN_THREAD_NAME";
const ENV_BOOTSTRAP: &str = "PYRUN_BOOTSTRAP";
const ENV_FLUSH_STREAMS: &str = "PYRUN_FLUSH_STREAMS";
const ENV_PRINT_TRACEBACKS: &str = "PYRUN_PRINT_TRACEBACKS";

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn lookup_flag(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    let flag = parse_flag(&raw);
    if flag.is_none() {
        tracing::warn!(value = %raw, "ignoring unrecognized {}", key);
    }
    flag
}

/// Runtime configuration for the embedded interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Name given to the worker OS thread
    pub thread_name: String,

    /// Script executed in every freshly created context
    pub bootstrap_script: Option<String>,

    /// Flush `sys.stdout` and `sys.stderr` after each task (default: true)
    pub flush_streams: bool,

    /// Print the guest traceback to `sys.stderr` when a task fails (default: true)
    pub print_tracebacks: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            bootstrap_script: None,
            flush_streams: true,
            print_tracebacks: true,
        }
    }
}

impl RuntimeConfig {
    /// Create a new runtime configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `PYRUN_*` environment variables.
    ///
    /// Unset variables keep their defaults. An unparsable boolean flag is
    /// ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_THREAD_NAME).filter(|name| !name.trim().is_empty()) {
            config.thread_name = name;
        }

        if let Some(script) = lookup(ENV_BOOTSTRAP) {
            config.bootstrap_script = Some(script);
        }

        if let Some(flag) = lookup_flag(&lookup, ENV_FLUSH_STREAMS) {
            config.flush_streams = flag;
        }

        if let Some(flag) = lookup_flag(&lookup, ENV_PRINT_TRACEBACKS) {
            config.print_tracebacks = flag;
        }

        config
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_bootstrap(mut self, source: impl Into<String>) -> Self {
        self.bootstrap_script = Some(source.into());
        self
    }

    pub fn with_flush_streams(mut self, flush: bool) -> Self {
        self.flush_streams = flush;
        self
    }

    pub fn with_print_tracebacks(mut self, print: bool) -> Self {
        self.print_tracebacks = print;
        self
    }
}
