/*!
 * Shutdown Tests
 * Post-order teardown, leaders before translators, forced removal
 */

use overlay_kernel::process::{KernelState, ProcessError, Signal};
use overlay_kernel::{ParentId, Pid, ProcessManager};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Runtime that records the order in which processes were told to terminate
fn obedient(pm: &ProcessManager, pid: Pid, log: &Arc<Mutex<Vec<Pid>>>) {
    let pm = pm.clone();
    let log = log.clone();
    thread::spawn(move || loop {
        match pm.listen_for_signal(pid) {
            Ok(Signal::Terminate) => {
                log.lock().push(pid);
                let _ = pm.deregister_process(pid, 0);
                return;
            }
            Ok(_) => continue,
            Err(_) => return,
        }
    });
}

#[test]
fn test_post_order_and_translators_last() {
    let pm = ProcessManager::builder()
        .with_shutdown_grace(Duration::from_secs(5))
        .build();
    let log = Arc::new(Mutex::new(Vec::new()));

    let t = pm.register_process(ParentId::Translator, 0, 0, "echofs", vec![]).unwrap();
    let a = pm.register_process(ParentId::Daemon, 1, 0, "a", vec![]).unwrap();
    let b = pm.register_process(ParentId::Process(a), 1, 0, "b", vec![]).unwrap();
    let c = pm.register_process(ParentId::Process(b), 1, 0, "c", vec![]).unwrap();
    for pid in [t, a, b, c] {
        obedient(&pm, pid, &log);
    }

    let report = pm.shutdown().unwrap();

    assert_eq!(report.terminated, vec![c, b, a, t]);
    assert!(report.forced.is_empty());
    assert_eq!(*log.lock(), vec![c, b, a, t]);
    assert_eq!(pm.kernel_state(), KernelState::Shutdown);
    assert_eq!(pm.process_count(), 0);
}

#[test]
fn test_unresponsive_process_is_forced() {
    let pm = ProcessManager::builder()
        .with_shutdown_grace(Duration::from_millis(50))
        .build();
    let log = Arc::new(Mutex::new(Vec::new()));

    let stubborn = pm.register_process(ParentId::Daemon, 1, 0, "stubborn", vec![]).unwrap();
    let polite = pm.register_process(ParentId::Daemon, 2, 0, "polite", vec![]).unwrap();
    obedient(&pm, polite, &log);

    let report = pm.shutdown().unwrap();
    assert_eq!(report.terminated, vec![stubborn, polite]);
    assert_eq!(report.forced, vec![stubborn]);
    assert!(!pm.exists(stubborn));
}

#[test]
fn test_shutdown_only_once() {
    let pm = ProcessManager::new();
    pm.shutdown().unwrap();
    assert!(matches!(pm.shutdown(), Err(ProcessError::IllegalOperation(_))));
    assert!(pm.wait_for_shutdown(Duration::from_millis(10)));
}
