//! Thin layer over the CPython C API.
//!
//! Every function here must run on the thread that created the
//! [`Interpreter`]. The worker in [`super::runner`] is the only caller.

use pyo3::exceptions::PyValueError;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::ffi::CString;

/// How a piece of source text is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// A sequence of statements, run for side effects (`Py_file_input`).
    Statements,
    /// A single expression whose value is returned (`Py_eval_input`).
    Expression,
}

impl Mode {
    fn start_token(self) -> std::os::raw::c_int {
        match self {
            Mode::Statements => ffi::Py_file_input,
            Mode::Expression => ffi::Py_eval_input,
        }
    }
}

/// The process-wide CPython instance.
///
/// Holds the main thread state while the GIL is released between tasks. The
/// raw pointer keeps the type `!Send`, so finalization can only happen on the
/// thread that initialized it.
pub(crate) struct Interpreter {
    main_thread: *mut ffi::PyThreadState,
}

impl Interpreter {
    /// Bring up the interpreter on the current thread and release the GIL.
    pub(crate) fn initialize() -> Result<Self, String> {
        // SAFETY: only the worker thread calls this, and the lifecycle guard
        // guarantees no other instance is alive.
        unsafe {
            if ffi::Py_IsInitialized() != 0 {
                return Err("a Python interpreter is already initialized in this process".into());
            }
            ffi::Py_InitializeEx(0);
            if ffi::Py_IsInitialized() == 0 {
                return Err("Py_InitializeEx returned without an interpreter".into());
            }
            let main_thread = ffi::PyEval_SaveThread();
            Ok(Self { main_thread })
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        // SAFETY: `Interpreter` is `!Send`, so this runs on the initializing
        // thread, which still owns `main_thread`.
        unsafe {
            ffi::PyEval_RestoreThread(self.main_thread);
            if ffi::Py_FinalizeEx() != 0 {
                tracing::warn!("Py_FinalizeEx could not flush buffered data");
            }
        }
    }
}

/// Create an empty module-level namespace with builtins available.
pub(crate) fn new_namespace(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let globals = PyDict::new(py);
    globals.set_item("__builtins__", py.import("builtins")?)?;
    globals.set_item("__name__", "__main__")?;
    Ok(globals)
}

/// Run `source` with `namespace` as both globals and locals.
///
/// The returned object is owned by the caller and released when dropped.
pub(crate) fn run<'py>(
    py: Python<'py>,
    namespace: &Bound<'py, PyDict>,
    source: &str,
    mode: Mode,
) -> PyResult<Bound<'py, PyAny>> {
    let code = CString::new(source)
        .map_err(|_| PyValueError::new_err("source code contains a NUL byte"))?;

    // SAFETY: the GIL is held through `py`, `code` outlives the call and the
    // namespace pointer is a live dict.
    unsafe {
        let result = ffi::PyRun_StringFlags(
            code.as_ptr(),
            mode.start_token(),
            namespace.as_ptr(),
            namespace.as_ptr(),
            std::ptr::null_mut(),
        );
        Bound::from_owned_ptr_or_err(py, result)
    }
}

/// `str(value)` as an owned Rust string.
pub(crate) fn stringify(value: &Bound<'_, PyAny>) -> PyResult<String> {
    let text = value.str()?;
    Ok(text.to_str()?.to_owned())
}

/// One-line description of a guest exception, e.g. `ZeroDivisionError('division by zero')`.
pub(crate) fn describe(py: Python<'_>, err: &PyErr) -> String {
    err.value(py)
        .repr()
        .and_then(|repr| repr.to_str().map(str::to_owned))
        .unwrap_or_else(|_| "<unprintable exception>".to_string())
}

pub(crate) fn flush_std_streams(py: Python<'_>) -> PyResult<()> {
    let sys = py.import("sys")?;
    for name in ["stdout", "stderr"] {
        let stream = sys.getattr(name)?;
        if !stream.is_none() {
            stream.call_method0("flush")?;
        }
    }
    Ok(())
}
