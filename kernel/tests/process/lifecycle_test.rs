/*!
 * Process Lifecycle Tests
 * Registration, zombies, waiter handoff, reparenting, events, and job control
 */

use overlay_kernel::process::{ProcEvent, ProcEventKind, ProcessError, ProcessState};
use overlay_kernel::{ParentId, ProcessManager};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn register(pm: &ProcessManager, parent: ParentId, cmd: &str) -> u32 {
    pm.register_process(parent, 1, 0, cmd, vec![]).unwrap()
}

#[test]
fn test_zombie_reclaimed_by_wait() {
    let pm = ProcessManager::new();
    let parent = register(&pm, ParentId::Daemon, "sh");
    let child = register(&pm, ParentId::Process(parent), "ls");

    pm.deregister_process(child, 0).unwrap();
    let zombie = pm.get_process(child).unwrap();
    assert!(zombie.is_zombie);
    assert_eq!(zombie.state, ProcessState::Shutdown);

    let event = pm.wait_for_child(parent).unwrap();
    assert_eq!(event.pid, child);
    assert_eq!(event.exit_status, 0);
    assert!(!pm.exists(child));
    assert!(pm.get_process(parent).unwrap().children.is_empty());
}

#[test]
fn test_blocked_waiter_receives_exit() {
    let pm = ProcessManager::new();
    let parent = register(&pm, ParentId::Daemon, "sh");
    let child = register(&pm, ParentId::Process(parent), "sleep");

    let waiter = {
        let pm = pm.clone();
        thread::spawn(move || pm.wait_for_child(parent))
    };
    thread::sleep(Duration::from_millis(50));
    pm.deregister_process(child, 7).unwrap();

    let event = waiter.join().unwrap().unwrap();
    assert_eq!(event.pid, child);
    assert_eq!(event.exit_status, 7);

    // handed off directly, no zombie left behind
    assert!(!pm.exists(child));
    assert_eq!(
        pm.wait_for_child(parent).unwrap_err(),
        ProcessError::NoChildren(parent)
    );
}

#[test]
fn test_each_exit_reaches_one_waiter() {
    let pm = ProcessManager::new();
    let parent = register(&pm, ParentId::Daemon, "sh");
    let children: Vec<u32> = (0..4)
        .map(|_| register(&pm, ParentId::Process(parent), "job"))
        .collect();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let pm = pm.clone();
            thread::spawn(move || pm.wait_for_child_timeout(parent, Some(Duration::from_secs(5))))
        })
        .collect();
    thread::sleep(Duration::from_millis(50));

    let exits: Vec<_> = children
        .iter()
        .map(|&child| {
            let pm = pm.clone();
            thread::spawn(move || pm.deregister_process(child, 0))
        })
        .collect();
    for exit in exits {
        exit.join().unwrap().unwrap();
    }

    let mut reaped: Vec<u32> = waiters
        .into_iter()
        .map(|w| w.join().unwrap().unwrap().pid)
        .collect();
    reaped.sort();
    assert_eq!(reaped, children);
    assert_eq!(pm.process_count(), 1);
}

#[test]
fn test_extra_waiter_times_out() {
    let pm = ProcessManager::new();
    let parent = register(&pm, ParentId::Daemon, "sh");
    let child = register(&pm, ParentId::Process(parent), "job");

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let pm = pm.clone();
            thread::spawn(move || pm.wait_for_child_timeout(parent, Some(Duration::from_millis(300))))
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    pm.deregister_process(child, 0).unwrap();

    let results: Vec<_> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
    let delivered = results.iter().filter(|r| matches!(r, Ok(e) if e.pid == child)).count();
    let timed_out = results
        .iter()
        .filter(|r| **r == Err(ProcessError::TimedOut(parent)))
        .count();
    assert_eq!((delivered, timed_out), (1, 1));
}

#[test]
fn test_children_reparented_to_root() {
    let pm = ProcessManager::new();
    let a = register(&pm, ParentId::Daemon, "a");
    let b = register(&pm, ParentId::Process(a), "b");
    let c = register(&pm, ParentId::Process(b), "c");

    pm.deregister_process(b, 0).unwrap();
    assert!(pm.get_process(b).unwrap().is_zombie);
    assert_eq!(pm.get_process(c).unwrap().parent_id, ParentId::Daemon);

    // root-level processes are removed outright
    pm.deregister_process(c, 0).unwrap();
    assert!(!pm.exists(c));
}

#[test]
fn test_zombie_children_reclaimed_with_parent() {
    let pm = ProcessManager::new();
    let a = register(&pm, ParentId::Daemon, "a");
    let b = register(&pm, ParentId::Process(a), "b");

    pm.deregister_process(b, 0).unwrap();
    pm.deregister_process(a, 0).unwrap();

    assert!(!pm.exists(a));
    assert!(!pm.exists(b));
    assert_eq!(pm.process_count(), 0);
}

#[test]
fn test_wait_cancelled_when_waiter_exits() {
    let pm = ProcessManager::new();
    let parent = register(&pm, ParentId::Daemon, "sh");
    register(&pm, ParentId::Process(parent), "job");

    let waiter = {
        let pm = pm.clone();
        thread::spawn(move || pm.wait_for_child(parent))
    };
    thread::sleep(Duration::from_millis(50));
    pm.deregister_process(parent, 0).unwrap();

    assert_eq!(waiter.join().unwrap().unwrap_err(), ProcessError::Cancelled(parent));
}

#[test]
fn test_lifecycle_events() {
    let pm = ProcessManager::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let parent = register(&pm, ParentId::Daemon, "sh");
    let child = register(&pm, ParentId::Process(parent), "vi");

    {
        let seen = seen.clone();
        pm.register_event_handler(
            parent,
            ProcEventKind::Child,
            Arc::new(move |event: &ProcEvent| seen.lock().push(format!("child:{:?}", event.kind()))),
        )
        .unwrap();
    }
    {
        let seen = seen.clone();
        pm.register_event_handler(
            child,
            ProcEventKind::Resume,
            Arc::new(move |_: &ProcEvent| seen.lock().push("resume".to_string())),
        )
        .unwrap();
    }
    let global = {
        let seen = seen.clone();
        pm.register_global_event_handler(
            ProcEventKind::Deregister,
            Arc::new(move |event: &ProcEvent| {
                if let ProcEvent::Deregister { pid } = event {
                    seen.lock().push(format!("deregister:{}", pid));
                }
            }),
        )
    };

    pm.update_process_state(child, ProcessState::Running).unwrap();
    pm.update_process_state(child, ProcessState::Suspended).unwrap();
    pm.update_process_state(child, ProcessState::Running).unwrap();
    pm.deregister_process(child, 0).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            "resume".to_string(),
            format!("deregister:{}", child),
            "child:Child".to_string(),
        ]
    );
    assert_eq!(pm.pending_signals(parent).unwrap(), 1);

    assert!(pm.unregister_global_event_handler(global));
    pm.deregister_process(parent, 0).unwrap();
    assert_eq!(seen.lock().len(), 3);
}

#[test]
fn test_handlers_require_live_process() {
    let pm = ProcessManager::new();
    let parent = register(&pm, ParentId::Daemon, "sh");
    let child = register(&pm, ParentId::Process(parent), "job");
    pm.deregister_process(child, 0).unwrap();

    assert_eq!(
        pm.register_event_handler(child, ProcEventKind::Deregister, Arc::new(|_: &ProcEvent| {}))
            .unwrap_err(),
        ProcessError::Exited(child)
    );
}

#[test]
fn test_job_control_accessors() {
    let pm = ProcessManager::new();
    let leader = pm.register_process(ParentId::Daemon, 0, 0, "login", vec![]).unwrap();

    pm.set_process_group_id(leader, leader).unwrap();
    pm.set_process_session_id(leader, leader).unwrap();
    pm.set_process_terminal_id(leader, 2).unwrap();

    assert_eq!(pm.get_process_group_id(leader).unwrap(), leader);
    assert_eq!(pm.get_process_session_id(leader).unwrap(), leader);
    assert_eq!(pm.get_process_terminal_id(leader).unwrap(), Some(2));

    let err = pm.set_process_session_id(leader, 50).unwrap_err();
    assert!(matches!(err, ProcessError::IllegalOperation(_)));
    assert_eq!(pm.get_process_session_id(leader).unwrap(), leader);

    assert_eq!(
        pm.get_process_group_id(999).unwrap_err(),
        ProcessError::UnknownProcess(999)
    );
}

#[test]
fn test_snapshots() {
    let pm = ProcessManager::new();
    let shell = pm.register_process(ParentId::Daemon, 10, 0, "sh", vec!["-l".into()]).unwrap();
    let job = pm.register_process(ParentId::Process(shell), 20, 0, "make", vec![]).unwrap();
    let fs = pm.register_process(ParentId::Translator, 0, 0, "echofs", vec![]).unwrap();

    let all = pm.get_process_data();
    assert_eq!(all.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![shell, job, fs]);
    assert_eq!(all[0].children, vec![job]);
    assert_eq!(all[0].args, vec!["-l"]);
    assert_eq!(all[2].parent_id.as_raw(), -1);

    let groups = pm.get_process_data_by_process_group();
    assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![0, 10, 20]);
    assert_eq!(groups[&20][0].cmd, "make");

    let json = serde_json::to_value(&all[1]).unwrap();
    assert_eq!(json["parent_id"], shell as i64);
}
