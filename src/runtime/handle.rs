//! Caller-side handle for submitting commands to the interpreter thread.

use crate::error::{Error, Result};
use crate::runtime::runner::{ContextId, Responder, RuntimeCommand};
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

/// Cheap, cloneable sender bound to one interpreter instance.
///
/// Once that instance stops, every request made through the handle fails with
/// [`Error::NotRunning`], even if a newer instance has been started since.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::UnboundedSender<RuntimeCommand>,
    generation: u64,
}

impl RuntimeHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RuntimeCommand>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the worker behind this handle has stopped receiving commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn submit(&self, command: RuntimeCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::NotRunning)
    }

    /// Submit a command and block the calling thread until the worker replies.
    ///
    /// Waits on a std channel, so it is safe to call from inside an async
    /// runtime (it blocks that runtime's thread for the duration).
    fn request<T>(&self, build: impl FnOnce(Responder<T>) -> RuntimeCommand) -> Result<T> {
        let (result_tx, result_rx) = std_mpsc::channel();
        self.submit(build(Responder::Blocking(result_tx)))?;
        result_rx.recv().map_err(|_| Error::NotRunning)
    }

    async fn request_async<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> RuntimeCommand,
    ) -> Result<T> {
        let (result_tx, result_rx) = oneshot::channel();
        self.submit(build(Responder::Async(result_tx)))?;
        result_rx.await.map_err(|_| Error::NotRunning)
    }

    pub fn new_context(&self) -> Result<ContextId> {
        self.request(|responder| RuntimeCommand::NewContext { responder })?
    }

    pub fn execute(&self, context: ContextId, code: &str) -> Result<()> {
        self.request(|responder| RuntimeCommand::Execute {
            context,
            code: code.to_string(),
            responder,
        })?
    }

    pub async fn execute_async(&self, context: ContextId, code: &str) -> Result<()> {
        self.request_async(|responder| RuntimeCommand::Execute {
            context,
            code: code.to_string(),
            responder,
        })
        .await?
    }

    pub fn eval_to_string(&self, context: ContextId, code: &str) -> Result<String> {
        self.request(|responder| RuntimeCommand::EvalToString {
            context,
            code: code.to_string(),
            responder,
        })?
    }

    pub async fn eval_to_string_async(&self, context: ContextId, code: &str) -> Result<String> {
        self.request_async(|responder| RuntimeCommand::EvalToString {
            context,
            code: code.to_string(),
            responder,
        })
        .await?
    }

    /// Ask the worker to release a context. Does not wait for the worker.
    pub fn drop_context(&self, context: ContextId) {
        // A stopped worker has already released everything.
        let _ = self.tx.send(RuntimeCommand::DropContext { context });
    }

    /// Send the drain signal and block until the interpreter is finalized.
    pub(crate) fn shutdown(&self) -> Result<()> {
        let (result_tx, result_rx) = std_mpsc::channel();
        self.submit(RuntimeCommand::Shutdown {
            responder: result_tx,
        })?;
        result_rx.recv().map_err(|_| Error::NotRunning)
    }
}
