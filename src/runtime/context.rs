//! Execution context - lightweight handle for namespace-isolated execution.

use super::RuntimeHandle;
use crate::error::Result;
use crate::runtime::runner::ContextId;

/// One session's namespace inside the shared interpreter.
///
/// Each context has its own globals and keeps state across calls. All
/// operations are delegated to the interpreter thread via message passing and
/// run one at a time, in submission order, across every context.
///
/// ```no_run
/// let a = pyrun::new_context();
/// let b = pyrun::new_context();
///
/// a.execute("x = 10").unwrap();
/// b.execute("x = 20").unwrap();
///
/// assert_eq!(a.eval_to_string("x").unwrap(), "10");
/// assert_eq!(b.eval_to_string("x").unwrap(), "20");
/// ```
///
/// A context belongs to the interpreter instance that created it. After
/// [`crate::shutdown`] every call on it fails with
/// [`crate::Error::NotRunning`].
pub struct Context {
    id: ContextId,
    runtime_handle: RuntimeHandle,
}

impl Context {
    /// Called by [`crate::try_new_context`] once the worker has created the namespace.
    pub(crate) fn new(id: ContextId, runtime_handle: RuntimeHandle) -> Self {
        Self { id, runtime_handle }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Generation of the interpreter instance this context lives in.
    pub fn generation(&self) -> u64 {
        self.runtime_handle.generation()
    }

    /// Whether the interpreter that owns this context is still running.
    pub fn is_valid(&self) -> bool {
        !self.runtime_handle.is_closed()
    }

    /// Run statements for their side effects.
    ///
    /// Guest exceptions and syntax errors are reported as
    /// [`crate::Error::Execution`].
    pub fn execute(&self, code: &str) -> Result<()> {
        self.runtime_handle.execute(self.id, code)
    }

    /// Evaluate a single expression and return `str()` of its value.
    ///
    /// Fails with [`crate::Error::Evaluation`] if the expression raises and
    /// with [`crate::Error::Conversion`] if its value cannot be stringified.
    pub fn eval_to_string(&self, expression: &str) -> Result<String> {
        self.runtime_handle.eval_to_string(self.id, expression)
    }

    pub async fn execute_async(&self, code: &str) -> Result<()> {
        self.runtime_handle.execute_async(self.id, code).await
    }

    pub async fn eval_to_string_async(&self, expression: &str) -> Result<String> {
        self.runtime_handle
            .eval_to_string_async(self.id, expression)
            .await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("generation", &self.generation())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.runtime_handle.is_closed() {
            return;
        }

        // Best-effort cleanup; the worker may stop before it gets to this.
        self.runtime_handle.drop_context(self.id);
    }
}
