/*!
 * Mount Table Persistence Tests
 * Passive declarations survive a restart; active ones do not
 */

use crate::common::harness_with_table;
use overlay_kernel::naming::{MountStatus, MountTable, NamingError};
use overlay_kernel::TranslatorOptions;
use pretty_assertions::assert_eq;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_passive_mount_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join(".mounttab");

    {
        let h = harness_with_table(TIMEOUT, Some(table.clone()));
        h.naming
            .bind_translator(
                "/mnt/x",
                "echofs",
                vec!["--verbose".into()],
                TranslatorOptions::PASSIVE,
            )
            .unwrap();
        h.naming
            .bind_translator("/mnt/tmp", "tmpfs", vec![], TranslatorOptions::ACTIVATE)
            .unwrap();
        assert_eq!(h.exec.spawn_count(), 1);
    }

    assert_eq!(
        std::fs::read_to_string(&table).unwrap(),
        "/mnt/x=echofs --verbose\n"
    );

    let h = harness_with_table(TIMEOUT, Some(table));
    assert_eq!(h.naming.start().unwrap(), 1);

    let mounts = h.naming.mounts();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].path, "/mnt/x");
    assert_eq!(mounts[0].args, vec!["--verbose"]);
    assert!(mounts[0].passive);
    assert_eq!(mounts[0].status, MountStatus::Configured);

    // started on demand
    let resolution = h.naming.lookup(0, "/mnt/x/readme.txt").unwrap();
    assert_eq!(resolution.handle.name(), "translator:/mnt/x");
}

#[test]
fn test_unbind_passive_rewrites_table() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join(".mounttab");
    let h = harness_with_table(TIMEOUT, Some(table.clone()));

    h.naming
        .bind_translator("/a", "afs", vec![], TranslatorOptions::PASSIVE)
        .unwrap();
    h.naming
        .bind_translator("/b", "bfs", vec![], TranslatorOptions::PASSIVE)
        .unwrap();
    h.naming
        .unbind_translator("/a", TranslatorOptions::PASSIVE)
        .unwrap();

    let on_disk = MountTable::load(&table).unwrap();
    assert!(on_disk.get("/a").is_none());
    assert!(on_disk.get("/b").is_some());

    // the in-memory mount stays until deactivated
    let a = h.naming.mounts().into_iter().find(|m| m.path == "/a").unwrap();
    assert!(!a.passive);
}

#[test]
fn test_deactivate_reverts_to_persisted_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with_table(TIMEOUT, Some(dir.path().join(".mounttab")));

    h.naming
        .bind_translator(
            "/mnt/x",
            "echofs",
            vec![],
            TranslatorOptions::PASSIVE | TranslatorOptions::ACTIVATE,
        )
        .unwrap();
    let pid = match h.naming.mounts()[0].status {
        MountStatus::Active(pid) => pid,
        other => panic!("unexpected status {:?}", other),
    };

    h.naming
        .unbind_translator("/mnt/x", TranslatorOptions::empty())
        .unwrap();
    let mounts = h.naming.mounts();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].status, MountStatus::Configured);
    assert!(crate::common::eventually(TIMEOUT, || !h.processes.exists(pid)));

    // an active-only mount disappears entirely
    h.naming
        .bind_translator("/mnt/y", "echofs", vec![], TranslatorOptions::ACTIVATE)
        .unwrap();
    h.naming
        .unbind_translator("/mnt/y", TranslatorOptions::ACTIVATE)
        .unwrap();
    assert!(h.naming.mounts().iter().all(|m| m.path != "/mnt/y"));

    assert_eq!(
        h.naming
            .unbind_translator("/mnt/z", TranslatorOptions::ACTIVATE)
            .unwrap_err(),
        NamingError::UnknownPath("/mnt/z".into())
    );
}

#[test]
fn test_unbind_drops_persisted_entry() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join(".mounttab");
    let h = harness_with_table(TIMEOUT, Some(table.clone()));

    h.naming
        .bind_translator("/mnt/x", "echofs", vec![], TranslatorOptions::PASSIVE)
        .unwrap();
    h.naming.unbind("/mnt/x").unwrap();

    assert!(MountTable::load(&table).unwrap().is_empty());
    assert!(h.naming.mounts().is_empty());
}
