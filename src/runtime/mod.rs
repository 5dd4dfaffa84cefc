//! Serialized runtime for an embedded CPython interpreter.
//!
//! The interpreter is not thread-safe and must be driven from the OS thread
//! that initialized it. This module owns that thread: exactly one worker runs
//! at a time, every context submits work to it through a queue, and the
//! lifecycle functions below start, stop and restart it.

pub mod config;
pub mod context;
pub mod handle;
mod interpreter;
pub mod runner;

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

pub use config::RuntimeConfig;
pub use context::Context;
pub use handle::RuntimeHandle;

/// Global lifecycle controller.
///
/// Holds the running worker, if any. The lock is held across startup and
/// across the whole drain, so concurrent first callers see one instance and a
/// restart can never overlap with the previous instance's finalization.
static CONTROLLER: Lazy<Lifecycle> = Lazy::new(Lifecycle::new);

struct Worker {
    handle: RuntimeHandle,
    thread: JoinHandle<()>,
}

struct Lifecycle {
    worker: Mutex<Option<Worker>>,
    config: Mutex<RuntimeConfig>,
    generations: AtomicU64,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            worker: Mutex::new(None),
            config: Mutex::new(RuntimeConfig::from_env()),
            generations: AtomicU64::new(0),
        }
    }

    fn ensure_started(&self) -> Result<RuntimeHandle> {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.as_ref() {
            return Ok(worker.handle.clone());
        }

        let config = self.config.lock().clone();
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::debug!(generation, thread = %config.thread_name, "starting interpreter");
        let (tx, thread) = runner::spawn_runtime_thread(config, generation).map_err(|err| {
            tracing::error!(generation, error = %err, "interpreter failed to start");
            err
        })?;

        let handle = RuntimeHandle::new(tx, generation);
        *slot = Some(Worker {
            handle: handle.clone(),
            thread,
        });
        Ok(handle)
    }

    fn shutdown(&self) {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.as_ref() else {
            return;
        };
        let generation = worker.handle.generation();

        tracing::info!(generation, "shutting down interpreter");
        if let Err(err) = worker.handle.shutdown() {
            tracing::warn!(
                generation,
                error = %err,
                "interpreter stopped without confirming shutdown"
            );
        }

        // Taken only after the worker confirmed; the lock is still held through the join.
        if let Some(Worker { thread, .. }) = slot.take() {
            if thread.join().is_err() {
                tracing::error!(generation, "interpreter thread panicked");
            }
        }
    }

    fn running_generation(&self) -> Option<u64> {
        self.worker
            .lock()
            .as_ref()
            .map(|worker| worker.handle.generation())
    }
}

/// Start the interpreter if it is not running yet.
///
/// Safe to call from any number of threads at once: exactly one interpreter is
/// started and every caller returns only once it is ready.
pub fn ensure_started() -> Result<()> {
    CONTROLLER.ensure_started().map(|_| ())
}

/// Stop the interpreter and wait until it has been finalized.
///
/// Commands already queued are served first. Does nothing if the interpreter
/// is not running. Contexts created before this call are invalid afterwards.
pub fn shutdown() {
    CONTROLLER.shutdown();
}

pub fn is_running() -> bool {
    CONTROLLER.running_generation().is_some()
}

/// Generation number of the running interpreter instance.
pub fn generation() -> Option<u64> {
    CONTROLLER.running_generation()
}

/// Set the configuration used the next time the interpreter starts.
pub fn configure(config: RuntimeConfig) {
    *CONTROLLER.config.lock() = config;
}

/// Create a new context, starting the interpreter if needed.
pub fn try_new_context() -> Result<Context> {
    let handle = CONTROLLER.ensure_started()?;
    let id = handle.new_context().map_err(|err| match err {
        Error::NotRunning => {
            Error::ContextCreation("interpreter stopped before the context was created".into())
        }
        other => other,
    })?;
    Ok(Context::new(id, handle))
}

/// Create a new context, starting the interpreter if needed.
///
/// An interpreter or context that cannot be set up leaves nothing to fall back
/// on, so this terminates the process. Use [`try_new_context`] to handle the
/// failure instead.
pub fn new_context() -> Context {
    match try_new_context() {
        Ok(context) => context,
        Err(err) => {
            tracing::error!(error = %err, "can't initialize Python");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::thread;

    #[test]
    #[serial]
    fn test_runtime_lifecycle() {
        ensure_started().unwrap();
        assert!(is_running());

        let context = try_new_context().unwrap();
        assert!(context.is_valid());
        assert_eq!(context.eval_to_string("40 + 2").unwrap(), "42");

        shutdown();
        assert!(!is_running());
        assert!(!context.is_valid());
    }

    #[test]
    #[serial]
    fn test_ensure_started_is_idempotent() {
        shutdown();
        ensure_started().unwrap();
        let first = generation().unwrap();

        ensure_started().unwrap();
        ensure_started().unwrap();
        assert_eq!(generation(), Some(first));

        shutdown();
    }

    #[test]
    #[serial]
    fn test_concurrent_first_start() {
        shutdown();
        let before = CONTROLLER.generations.load(Ordering::SeqCst);

        let threads: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| ensure_started().map(|_| generation())))
            .collect();

        let seen: Vec<_> = threads
            .into_iter()
            .map(|t| t.join().unwrap().unwrap())
            .collect();

        let started = before + 1;
        assert!(seen.iter().all(|g| *g == Some(started)));
        assert_eq!(CONTROLLER.generations.load(Ordering::SeqCst), started);

        shutdown();
    }

    #[test]
    #[serial]
    fn test_shutdown_when_not_running() {
        shutdown();
        assert!(!is_running());
        shutdown();
        assert!(!is_running());
        assert_eq!(generation(), None);
    }

    #[test]
    #[serial]
    fn test_concurrent_shutdown() {
        ensure_started().unwrap();

        let threads: Vec<_> = (0..4).map(|_| thread::spawn(shutdown)).collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(!is_running());
    }

    #[test]
    #[serial]
    fn test_configured_bootstrap_runs_in_new_contexts() {
        shutdown();
        configure(RuntimeConfig::new().with_bootstrap("VERSION = '1.0.0'"));

        let first = try_new_context().unwrap();
        let second = try_new_context().unwrap();
        assert_eq!(first.eval_to_string("VERSION").unwrap(), "1.0.0");
        assert_eq!(second.eval_to_string("VERSION").unwrap(), "1.0.0");

        shutdown();
        configure(RuntimeConfig::default());
    }

    #[test]
    #[serial]
    fn test_failing_bootstrap_rejects_context() {
        shutdown();
        configure(RuntimeConfig::new().with_bootstrap("raise RuntimeError('nope')"));

        match try_new_context() {
            Err(Error::ContextCreation(msg)) => assert!(msg.contains("RuntimeError")),
            other => panic!("expected context creation failure, got {:?}", other),
        }
        assert!(is_running());

        shutdown();
        configure(RuntimeConfig::default());
    }

    #[test]
    #[serial]
    fn test_guest_traceback_goes_to_stderr() {
        for (print, expected) in [(true, "True"), (false, "False")] {
            shutdown();
            configure(RuntimeConfig::new().with_print_tracebacks(print));

            let context = try_new_context().unwrap();
            context
                .execute("import io, sys\ncaptured = io.StringIO()\nsys.stderr = captured")
                .unwrap();
            assert!(matches!(context.execute("1/0"), Err(Error::Execution(_))));
            assert_eq!(
                context
                    .eval_to_string("'ZeroDivisionError' in captured.getvalue()")
                    .unwrap(),
                expected
            );
        }

        shutdown();
        configure(RuntimeConfig::default());
    }

    #[test]
    #[serial]
    fn test_tasks_run_on_one_os_thread() {
        let contexts: Vec<_> = (0..4).map(|_| try_new_context().unwrap()).collect();

        let ids: Vec<String> = thread::scope(|scope| {
            let handles: Vec<_> = contexts
                .iter()
                .map(|ctx| {
                    scope.spawn(move || {
                        ctx.eval_to_string("__import__('threading').get_native_id()")
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
