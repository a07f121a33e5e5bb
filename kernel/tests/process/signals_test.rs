/*!
 * Signal Delivery Tests
 * Per-process FIFO queues, group fan-out, and kernel shutdown requests
 */

use overlay_kernel::process::{KernelState, ProcessError, Signal};
use overlay_kernel::{ParentId, ProcessManager};
use pretty_assertions::assert_eq;
use std::thread;
use std::time::Duration;

#[test]
fn test_fifo_per_process_with_interleaving() {
    let pm = ProcessManager::new();
    let x = pm.register_process(ParentId::Daemon, 1, 0, "x", vec![]).unwrap();
    let y = pm.register_process(ParentId::Daemon, 1, 0, "y", vec![]).unwrap();

    let sequence = [Signal::Stop, Signal::Continue, Signal::Hangup, Signal::Terminate];
    for (i, signal) in sequence.iter().enumerate() {
        pm.send_signal(x, *signal).unwrap();
        if i % 2 == 0 {
            pm.send_signal(y, Signal::Interrupt).unwrap();
        }
    }

    let received: Vec<Signal> = (0..sequence.len())
        .map(|_| pm.listen_for_signal(x).unwrap())
        .collect();
    assert_eq!(received, sequence.to_vec());
    assert_eq!(pm.pending_signals(y).unwrap(), 2);
}

#[test]
fn test_listener_wakes_on_send() {
    let pm = ProcessManager::new();
    let pid = pm.register_process(ParentId::Daemon, 1, 0, "d", vec![]).unwrap();

    let listener = {
        let pm = pm.clone();
        thread::spawn(move || pm.listen_for_signal(pid))
    };
    thread::sleep(Duration::from_millis(50));
    pm.send_signal(pid, Signal::Terminate).unwrap();

    assert_eq!(listener.join().unwrap(), Ok(Signal::Terminate));
}

#[test]
fn test_listener_cancelled_on_deregister() {
    let pm = ProcessManager::new();
    let pid = pm.register_process(ParentId::Daemon, 1, 0, "d", vec![]).unwrap();

    let listener = {
        let pm = pm.clone();
        thread::spawn(move || pm.listen_for_signal(pid))
    };
    thread::sleep(Duration::from_millis(50));
    pm.deregister_process(pid, 0).unwrap();

    assert_eq!(listener.join().unwrap(), Err(ProcessError::Cancelled(pid)));
}

#[test]
fn test_listen_timeout() {
    let pm = ProcessManager::new();
    let pid = pm.register_process(ParentId::Daemon, 1, 0, "d", vec![]).unwrap();
    assert_eq!(
        pm.listen_for_signal_timeout(pid, Some(Duration::from_millis(20))),
        Err(ProcessError::TimedOut(pid))
    );
}

#[test]
fn test_group_fan_out() {
    let pm = ProcessManager::new();
    let a = pm.register_process(ParentId::Daemon, 7, 0, "a", vec![]).unwrap();
    let b = pm.register_process(ParentId::Process(a), 7, 0, "b", vec![]).unwrap();
    let other = pm.register_process(ParentId::Daemon, 8, 0, "c", vec![]).unwrap();

    assert_eq!(pm.send_signal_process_group(7, Signal::Stop).unwrap(), 2);
    assert_eq!(pm.listen_for_signal(a).unwrap(), Signal::Stop);
    assert_eq!(pm.listen_for_signal(b).unwrap(), Signal::Stop);
    assert_eq!(pm.pending_signals(other).unwrap(), 0);

    assert_eq!(
        pm.send_signal_process_group(99, Signal::Stop).unwrap_err(),
        ProcessError::UnknownProcessGroup(99)
    );
}

#[test]
fn test_signal_to_exited_process() {
    let pm = ProcessManager::new();
    let parent = pm.register_process(ParentId::Daemon, 1, 0, "sh", vec![]).unwrap();
    let child = pm.register_process(ParentId::Process(parent), 1, 0, "ls", vec![]).unwrap();
    pm.deregister_process(child, 0).unwrap();

    assert_eq!(
        pm.send_signal(child, Signal::Terminate).unwrap_err(),
        ProcessError::Exited(child)
    );
    assert_eq!(
        pm.send_signal(4242, Signal::Terminate).unwrap_err(),
        ProcessError::UnknownProcess(4242)
    );
}

#[test]
fn test_shutdown_signal_stops_kernel() {
    let pm = ProcessManager::builder()
        .with_shutdown_grace(Duration::from_millis(50))
        .build();
    let pid = pm.register_process(ParentId::Daemon, 1, 0, "init", vec![]).unwrap();

    pm.send_signal(pid, Signal::Shutdown).unwrap();
    assert!(pm.wait_for_shutdown(Duration::from_secs(5)));
    assert_eq!(pm.kernel_state(), KernelState::Shutdown);
    assert!(!pm.exists(pid));
}
