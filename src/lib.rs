//! Concurrency-safe access to a single embedded CPython interpreter.
//!
//! CPython must be driven from the OS thread that initialized it, one call at
//! a time. `pyrun` pins the interpreter to a dedicated worker thread and lets
//! any number of threads submit code to it through [`Context`] handles, each
//! with its own namespace.
//!
//! ```no_run
//! let py = pyrun::new_context();
//! py.execute("a = lambda: 'Hello, world!'").unwrap();
//! assert_eq!(py.eval_to_string("a()").unwrap(), "Hello, world!");
//! pyrun::shutdown();
//! ```

mod error;
mod runtime;

pub use error::{Error, Result};
pub use runtime::runner::ContextId;
pub use runtime::{
    configure, ensure_started, generation, is_running, new_context, shutdown, try_new_context,
    Context, RuntimeConfig,
};
