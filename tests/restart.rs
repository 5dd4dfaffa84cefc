//! Shutdown and restart of the interpreter.
//!
//! Every test here changes global lifecycle state and runs serially.

mod common;

use pyrun::Error;
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
#[serial]
fn test_clean_restart() {
    common::init_tracing();
    let old = pyrun::try_new_context().unwrap();
    old.execute("import sys\nsys.pyrun_marker = 1").unwrap();
    let old_generation = old.generation();

    pyrun::shutdown();
    assert!(!pyrun::is_running());
    assert!(!old.is_valid());

    pyrun::ensure_started().unwrap();
    let new_generation = pyrun::generation().unwrap();
    assert!(new_generation > old_generation);

    let fresh = pyrun::try_new_context().unwrap();
    assert_eq!(fresh.generation(), new_generation);
    assert_eq!(
        fresh.eval_to_string("hasattr(__import__('sys'), 'pyrun_marker')").unwrap(),
        "False"
    );
    assert_eq!(fresh.eval_to_string("2+2").unwrap(), "4");

    pyrun::shutdown();
}

#[test]
#[serial]
fn test_stale_context_never_reaches_new_interpreter() {
    let stale = pyrun::try_new_context().unwrap();
    stale.execute("x = 1").unwrap();

    pyrun::shutdown();
    let _fresh = pyrun::try_new_context().unwrap();

    assert_eq!(stale.execute("x = 2"), Err(Error::NotRunning));
    assert_eq!(stale.eval_to_string("x"), Err(Error::NotRunning));

    pyrun::shutdown();
}

#[test]
#[serial]
fn test_shutdown_drains_queued_tasks() {
    let py = Arc::new(pyrun::try_new_context().unwrap());

    let slow = {
        let py = Arc::clone(&py);
        thread::spawn(move || py.execute("import time\ntime.sleep(0.3)\nfinished = True"))
    };

    thread::sleep(Duration::from_millis(50));
    pyrun::shutdown();

    assert_eq!(slow.join().unwrap(), Ok(()));
    assert_eq!(py.eval_to_string("finished"), Err(Error::NotRunning));
}

#[test]
#[serial]
fn test_repeated_restart_cycles() {
    for i in 0..3 {
        let py = pyrun::new_context();
        py.execute(&format!("n = {}", i)).unwrap();
        assert_eq!(py.eval_to_string("n * 2").unwrap(), format!("{}", i * 2));
        pyrun::shutdown();
    }

    pyrun::shutdown();
    assert!(!pyrun::is_running());
}

#[test]
#[serial]
fn test_contexts_dropped_after_shutdown_are_harmless() {
    let contexts: Vec<_> = (0..4).map(|_| pyrun::try_new_context().unwrap()).collect();
    pyrun::shutdown();
    drop(contexts);

    let py = pyrun::try_new_context().unwrap();
    assert_eq!(py.eval_to_string("'alive'").unwrap(), "alive");
    pyrun::shutdown();
}

#[test]
#[serial]
fn test_shutdown_inside_async_runtime() {
    common::init_tracing();
    let py = pyrun::try_new_context().unwrap();
    py.execute("value = 'before'").unwrap();
    let old_generation = py.generation();

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    rt.block_on(async { pyrun::shutdown() });

    assert!(!pyrun::is_running());
    assert!(!py.is_valid());

    let fresh = rt.block_on(async { pyrun::try_new_context() }).unwrap();
    assert!(fresh.generation() > old_generation);
    assert_eq!(fresh.eval_to_string("'after'").unwrap(), "after");

    rt.block_on(async { pyrun::shutdown() });
    assert!(!pyrun::is_running());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_restart_cycle_from_async_task() {
    let py = pyrun::try_new_context().unwrap();
    py.execute_async("n = 3").await.unwrap();

    pyrun::shutdown();
    assert_eq!(py.execute_async("n = 4").await, Err(Error::NotRunning));

    let fresh = pyrun::try_new_context().unwrap();
    assert_eq!(fresh.eval_to_string_async("2 + 2").await.unwrap(), "4");
    pyrun::shutdown();
}
