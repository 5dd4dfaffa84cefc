//! Worker thread that owns the embedded interpreter.
//!
//! The interpreter is created, used and finalized on one dedicated OS thread.
//! Callers never touch it directly: they send [`RuntimeCommand`]s over an
//! unbounded queue and the worker executes them one at a time, in arrival
//! order, replying on each command's responder.

use crate::error::{Error, Result};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::interpreter::{self, Interpreter, Mode};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::collections::HashMap;
use std::sync::mpsc::Receiver as StdReceiver;
use std::sync::mpsc::Sender as StdSender;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

type InitSignalChannel = (StdSender<Result<()>>, StdReceiver<Result<()>>);

/// Identifier of an execution context within one interpreter instance.
pub type ContextId = u64;

/// Reply channel of a single command.
///
/// Blocking callers wait on a std channel, which is safe to block on even from
/// inside an async runtime; async callers await a oneshot.
pub enum Responder<T> {
    Blocking(StdSender<T>),
    Async(oneshot::Sender<T>),
}

impl<T> Responder<T> {
    /// Deliver the reply. A caller that stopped waiting is not an error.
    pub fn send(self, value: T) {
        match self {
            Responder::Blocking(tx) => {
                let _ = tx.send(value);
            }
            Responder::Async(tx) => {
                let _ = tx.send(value);
            }
        }
    }
}

/// Commands sent to the runtime thread.
pub enum RuntimeCommand {
    NewContext {
        responder: Responder<Result<ContextId>>,
    },
    Execute {
        context: ContextId,
        code: String,
        responder: Responder<Result<()>>,
    },
    EvalToString {
        context: ContextId,
        code: String,
        responder: Responder<Result<String>>,
    },
    DropContext {
        context: ContextId,
    },
    Shutdown {
        responder: StdSender<()>,
    },
}

/// Start the interpreter thread and wait until it is ready to take commands.
pub(crate) fn spawn_runtime_thread(
    config: RuntimeConfig,
    generation: u64,
) -> Result<(mpsc::UnboundedSender<RuntimeCommand>, JoinHandle<()>)> {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<RuntimeCommand>();
    let (init_tx, init_rx): InitSignalChannel = std::sync::mpsc::channel();

    let thread = std::thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            let mut core = match RuntimeCore::new(config, generation) {
                Ok(core) => {
                    let _ = init_tx.send(Ok(()));
                    core
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let confirm = core.run(&mut cmd_rx);

            // Commands queued behind the drain signal are dropped unanswered.
            cmd_rx.close();
            drop(cmd_rx);
            drop(core);
            tracing::info!(generation, "interpreter finalized");

            if let Some(confirm) = confirm {
                let _ = confirm.send(());
            }
        })
        .map_err(|e| Error::Startup(format!("failed to spawn interpreter thread: {}", e)))?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok((cmd_tx, thread)),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => Err(Error::Startup(
            "interpreter thread exited during initialization".to_string(),
        )),
    }
}

struct RuntimeCore {
    contexts: HashMap<ContextId, Py<PyDict>>,
    next_context_id: ContextId,
    generation: u64,
    bootstrap_script: Option<String>,
    flush_streams: bool,
    print_tracebacks: bool,
    // Declared last so it is finalized after the namespaces are released.
    _interpreter: Interpreter,
}

impl RuntimeCore {
    fn new(config: RuntimeConfig, generation: u64) -> Result<Self> {
        let RuntimeConfig {
            thread_name: _,
            bootstrap_script,
            flush_streams,
            print_tracebacks,
        } = config;

        let interpreter = Interpreter::initialize().map_err(Error::Startup)?;
        tracing::info!(generation, "interpreter started");

        Ok(Self {
            contexts: HashMap::new(),
            next_context_id: 1,
            generation,
            bootstrap_script,
            flush_streams,
            print_tracebacks,
            _interpreter: interpreter,
        })
    }

    /// Serve commands until the drain signal arrives or every sender is gone.
    ///
    /// Returns the shutdown responder so it can be answered after the
    /// interpreter has been finalized.
    fn run(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<RuntimeCommand>,
    ) -> Option<StdSender<()>> {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                RuntimeCommand::NewContext { responder } => {
                    let result = self.new_context();
                    responder.send(result);
                }
                RuntimeCommand::Execute {
                    context,
                    code,
                    responder,
                } => {
                    let result = self.execute(context, &code);
                    responder.send(result);
                }
                RuntimeCommand::EvalToString {
                    context,
                    code,
                    responder,
                } => {
                    let result = self.eval_to_string(context, &code);
                    responder.send(result);
                }
                RuntimeCommand::DropContext { context } => {
                    self.drop_context(context);
                }
                RuntimeCommand::Shutdown { responder } => {
                    tracing::debug!(
                        generation = self.generation,
                        live_contexts = self.contexts.len(),
                        "draining interpreter"
                    );
                    return Some(responder);
                }
            }
        }

        tracing::debug!(
            generation = self.generation,
            "command queue closed, stopping interpreter"
        );
        None
    }

    fn new_context(&mut self) -> Result<ContextId> {
        let id = self.next_context_id;
        let generation = self.generation;
        let bootstrap = self.bootstrap_script.as_deref();

        let namespace = Python::attach(|py| -> Result<Py<PyDict>> {
            let namespace = interpreter::new_namespace(py)
                .map_err(|err| Error::ContextCreation(interpreter::describe(py, &err)))?;

            if let Some(script) = bootstrap {
                interpreter::run(py, &namespace, script, Mode::Statements).map_err(|err| {
                    Error::ContextCreation(format!(
                        "bootstrap script failed: {}",
                        interpreter::describe(py, &err)
                    ))
                })?;
            }

            Ok(namespace.unbind())
        })?;

        self.contexts.insert(id, namespace);
        self.next_context_id += 1;
        tracing::debug!(generation, context = id, "context created");
        Ok(id)
    }

    fn execute(&self, context: ContextId, code: &str) -> Result<()> {
        Python::attach(|py| -> Result<()> {
            let namespace = self.namespace(py, context)?;
            let result = interpreter::run(py, namespace, code, Mode::Statements)
                .map(drop)
                .map_err(|err| self.guest_failure(py, context, &err, Error::Execution));
            self.flush(py);
            result
        })
    }

    fn eval_to_string(&self, context: ContextId, code: &str) -> Result<String> {
        Python::attach(|py| -> Result<String> {
            let namespace = self.namespace(py, context)?;
            let result = interpreter::run(py, namespace, code, Mode::Expression)
                .map_err(|err| self.guest_failure(py, context, &err, Error::Evaluation))
                .and_then(|value| {
                    interpreter::stringify(&value)
                        .map_err(|err| self.guest_failure(py, context, &err, Error::Conversion))
                });
            self.flush(py);
            result
        })
    }

    fn drop_context(&mut self, context: ContextId) {
        Python::attach(|_py| {
            if self.contexts.remove(&context).is_some() {
                tracing::debug!(generation = self.generation, context, "context released");
            }
        });
    }

    fn namespace<'a, 'py>(
        &'a self,
        py: Python<'py>,
        context: ContextId,
    ) -> Result<&'a Bound<'py, PyDict>> {
        self.contexts
            .get(&context)
            .map(|namespace| namespace.bind(py))
            .ok_or(Error::UnknownContext(context))
    }

    fn guest_failure(
        &self,
        py: Python<'_>,
        context: ContextId,
        err: &PyErr,
        kind: fn(String) -> Error,
    ) -> Error {
        let detail = interpreter::describe(py, err);
        if self.print_tracebacks {
            err.print(py);
        }
        tracing::debug!(
            generation = self.generation,
            context,
            error = %detail,
            "guest code failed"
        );
        kind(detail)
    }

    fn flush(&self, py: Python<'_>) {
        if !self.flush_streams {
            return;
        }
        if let Err(err) = interpreter::flush_std_streams(py) {
            tracing::warn!(
                generation = self.generation,
                error = %interpreter::describe(py, &err),
                "failed to flush standard streams"
            );
        }
    }
}

impl Drop for RuntimeCore {
    fn drop(&mut self) {
        // Namespaces must be released while attached, before finalization.
        let contexts = std::mem::take(&mut self.contexts);
        Python::attach(|_py| drop(contexts));
    }
}
