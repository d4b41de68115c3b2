//! DirectoryHandle against the in-memory store.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use celfs_client::{DirectoryHandle, FsError, DIRECTORY_CONTENT_TYPE};
use celfs_object::FileIdentifier;
use celfs_proto::StorageRequest;
use common::Cluster;

fn root(cluster: &Cluster) -> DirectoryHandle {
    let dir = cluster.directory("/");
    dir.create(&cluster.alice, None, cluster.attrs()).unwrap();
    dir
}

/// Touch `target` on each of its next `times` writes (all of them if `None`).
fn contend_on_writes(cluster: &Cluster, target: FileIdentifier, times: Option<usize>) -> Arc<AtomicUsize> {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    cluster.store.set_interceptor(Some(Box::new(move |store, request| {
        if let StorageRequest::WriteFile { file, .. } = request {
            if *file == target {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if times.map_or(true, |limit| n < limit) {
                    store.touch(file);
                }
            }
        }
    })));
    seen
}

#[test]
fn test_create_root_and_child() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let child = cluster.directory("/docs");
    child.create(alice, Some(&root), cluster.attrs()).unwrap();

    assert_eq!(root.get_all_names(alice).unwrap(), [".", ".."]);
    assert_eq!(root.get_file_identifier(alice, ".").unwrap(), *root.file_identifier());
    assert_eq!(root.get_file_identifier(alice, "..").unwrap(), *root.file_identifier());
    assert_eq!(child.get_file_identifier(alice, ".").unwrap(), *child.file_identifier());
    assert_eq!(child.get_file_identifier(alice, "..").unwrap(), *root.file_identifier());

    let parent = child.get_dirent(alice, "..").unwrap();
    assert_eq!(parent.serial_number, root.handle().serial_number(alice).unwrap());

    assert_eq!(child.attributes(alice).unwrap().content_type, DIRECTORY_CONTENT_TYPE);
    assert!(child.directory_exists(alice).unwrap());
    assert!(matches!(
        cluster.directory("/docs").create(alice, Some(&root), cluster.attrs()),
        Err(FsError::Exists(_))
    ));
}

#[test]
fn test_link_lookup_unlink() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let file = cluster.handle("/notes.txt");
    file.create(alice, &cluster.attrs().with_serial_number(99)).unwrap();

    root.link(alice, "notes.txt", &file, false).unwrap();
    assert_eq!(root.get_file_identifier(alice, "notes.txt").unwrap(), *file.file_identifier());
    assert_eq!(root.get_dirent(alice, "notes.txt").unwrap().serial_number, 99);

    let dirents = root.get_dirents(alice).unwrap();
    let names: Vec<_> = dirents.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, [".", "..", "notes.txt"]);

    root.unlink(alice, "notes.txt").unwrap();
    assert!(matches!(root.get_file_identifier(alice, "notes.txt"), Err(FsError::NotFound(_))));
    assert!(matches!(root.unlink(alice, "notes.txt"), Err(FsError::NotFound(_))));
    // Shrinking the list must not leave stale bytes behind
    assert_eq!(root.get_all_names(alice).unwrap(), [".", ".."]);
}

#[test]
fn test_link_without_overwrite() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let first = cluster.handle("/a");
    let second = cluster.handle("/b");
    first.create(alice, &cluster.attrs()).unwrap();
    second.create(alice, &cluster.attrs()).unwrap();

    root.link(alice, "x", &first, false).unwrap();
    assert_eq!(root.link(alice, "x", &second, false), Err(FsError::Exists("x".into())));
    assert_eq!(root.get_file_identifier(alice, "x").unwrap(), *first.file_identifier());

    root.link(alice, "x", &second, true).unwrap();
    assert_eq!(root.get_file_identifier(alice, "x").unwrap(), *second.file_identifier());
}

#[test]
fn test_invalid_names() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let file = cluster.handle("/f");
    file.create(alice, &cluster.attrs()).unwrap();

    for name in ["", ".", "..", "a/b", "/version"] {
        assert!(
            matches!(root.link(alice, name, &file, true), Err(FsError::InvalidName(_))),
            "{:?}",
            name
        );
    }
    assert!(matches!(root.unlink(alice, ".."), Err(FsError::InvalidName(_))));
    assert!(matches!(root.rename(alice, "f", "a/b", false), Err(FsError::InvalidName(_))));
    assert!(matches!(root.get_file_identifier(alice, "/version"), Err(FsError::InvalidName(_))));
}

#[test]
fn test_rename_and_unlink_file() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let file = cluster.handle("/f");
    let other = cluster.handle("/g");
    file.create(alice, &cluster.attrs()).unwrap();
    other.create(alice, &cluster.attrs()).unwrap();

    root.link(alice, "one", &file, false).unwrap();
    root.link(alice, "two", &file, false).unwrap();
    root.link(alice, "three", &other, false).unwrap();

    root.rename(alice, "one", "uno", false).unwrap();
    assert!(matches!(root.get_dirent(alice, "one"), Err(FsError::NotFound(_))));
    assert_eq!(root.get_file_identifier(alice, "uno").unwrap(), *file.file_identifier());

    assert_eq!(root.rename(alice, "uno", "three", false), Err(FsError::Exists("three".into())));
    assert!(matches!(root.rename(alice, "missing", "x", false), Err(FsError::NotFound(_))));
    root.rename(alice, "uno", "uno", false).unwrap();

    assert_eq!(root.unlink_file(alice, file.file_identifier()).unwrap(), 2);
    assert_eq!(root.get_all_names(alice).unwrap(), [".", "..", "three"]);
    assert!(matches!(
        root.unlink_file(alice, file.file_identifier()),
        Err(FsError::NotFound(_))
    ));

    // The directory's own "." entry is never removed
    assert!(matches!(
        root.unlink_file(alice, root.file_identifier()),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn test_set_parent_and_is_directory() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let a = cluster.directory("/a");
    let b = cluster.directory("/b");
    a.create(alice, Some(&root), cluster.attrs()).unwrap();
    b.create(alice, Some(&root), cluster.attrs()).unwrap();

    b.set_parent(alice, &a).unwrap();
    assert_eq!(b.get_file_identifier(alice, "..").unwrap(), *a.file_identifier());

    let plain = cluster.handle("/plain");
    plain.create(alice, &cluster.attrs()).unwrap();
    assert!(!DirectoryHandle::is_directory(alice, &plain).unwrap());
    assert!(DirectoryHandle::is_directory(alice, a.handle()).unwrap());
    assert!(!cluster.directory("/plain").directory_exists(alice).unwrap());
    assert!(!cluster.directory("/nowhere").directory_exists(alice).unwrap());
}

#[test]
fn test_corrupted_contents() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let backing = root.handle();

    backing.truncate(alice, None, 0).unwrap();
    assert!(matches!(root.read_dir(alice), Err(FsError::DirectoryCorrupted { .. })));

    backing.write(alice, None, 0, b"no separator here\n").unwrap();
    assert!(matches!(root.get_all_names(alice), Err(FsError::DirectoryCorrupted { .. })));

    backing.truncate(alice, None, 0).unwrap();
    backing.write(alice, None, 0, b".=whatever\n").unwrap();
    assert!(matches!(root.get_dirents(alice), Err(FsError::DirectoryCorrupted { .. })));

    backing.truncate(alice, None, 0).unwrap();
    backing.write(alice, None, 0, b"/version=1\nbad=not-a-dirent\n").unwrap();
    assert!(matches!(
        root.get_file_identifier(alice, "bad"),
        Err(FsError::DirectoryCorrupted { .. })
    ));

    backing.truncate(alice, None, 0).unwrap();
    backing.write(alice, None, 0, b"/version=2\n").unwrap();
    assert_eq!(
        root.read_dir(alice).unwrap_err(),
        FsError::BadVersion { found: 2, expected: 1 }
    );
}

#[test]
fn test_oversized_directory_is_corrupted() {
    let mut config = celfs_config::Config::default();
    config.directory.max_encoded_bytes = 1024;
    let cluster = Cluster::with_config(config);
    let alice = &cluster.alice;
    let root = root(&cluster);

    let file = cluster.handle("/f");
    file.create(alice, &cluster.attrs()).unwrap();
    let long_name = "n".repeat(800);
    assert!(matches!(
        root.link(alice, &long_name, &file, false),
        Err(FsError::CapacityExceeded(_))
    ));

    root.handle().write(alice, None, 0, &[b'#'; 1100]).unwrap();
    assert!(matches!(root.read_dir(alice), Err(FsError::DirectoryCorrupted { .. })));
}

#[test]
fn test_lost_race_exhausts_update_attempts() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let file = cluster.handle("/f");
    file.create(alice, &cluster.attrs()).unwrap();

    let writes = contend_on_writes(&cluster, *root.file_identifier(), None);
    assert_eq!(
        root.link(alice, "f", &file, true),
        Err(FsError::RetriesExceeded {
            file: *root.file_identifier(),
            attempts: 5
        })
    );
    assert_eq!(writes.load(Ordering::SeqCst), 5);

    // An exclusive link gets one cycle only
    writes.store(0, Ordering::SeqCst);
    assert!(root.link(alice, "f", &file, false).unwrap_err().is_retries_exceeded());
    assert_eq!(writes.load(Ordering::SeqCst), 1);

    cluster.store.set_interceptor(None);
    assert!(matches!(root.get_dirent(alice, "f"), Err(FsError::NotFound(_))));
}

#[test]
fn test_transient_contention_recovers() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let file = cluster.handle("/f");
    file.create(alice, &cluster.attrs()).unwrap();

    let writes = contend_on_writes(&cluster, *root.file_identifier(), Some(2));
    root.link(alice, "f", &file, true).unwrap();
    assert_eq!(writes.load(Ordering::SeqCst), 3);
    cluster.store.set_interceptor(None);

    assert_eq!(root.get_file_identifier(alice, "f").unwrap(), *file.file_identifier());
}

#[test]
fn test_concurrent_aliases_both_land() {
    let cluster = Cluster::new();
    let alice = &cluster.alice;
    let root = root(&cluster);
    let alias = cluster.directory("/");
    let (f, g) = (cluster.handle("/f"), cluster.handle("/g"));
    f.create(alice, &cluster.attrs()).unwrap();
    g.create(alice, &cluster.attrs()).unwrap();

    root.link(alice, "f", &f, false).unwrap();
    alias.link(alice, "g", &g, false).unwrap();
    root.unlink(alice, "f").unwrap();
    alias.link(alice, "f2", &f, false).unwrap();

    assert_eq!(root.get_all_names(alice).unwrap(), [".", "..", "f2", "g"]);
}

#[test]
fn test_locks_and_deletion() {
    let cluster = Cluster::new();
    let (alice, bob) = (&cluster.alice, &cluster.bob);
    let root = root(&cluster);
    let file = cluster.handle("/f");
    file.create(alice, &cluster.attrs()).unwrap();

    root.lock(alice, "tree", Some("reorganizing")).unwrap();
    let lock = root.inspect_lock(bob).unwrap().unwrap();
    assert_eq!(lock.holder, *alice.id());
    root.link(alice, "f", &file, false).unwrap();
    root.unlock(alice, "tree").unwrap();
    assert_eq!(root.inspect_lock(alice).unwrap(), None);

    root.mark_deleted(alice).unwrap();
    assert!(root.attributes(alice).unwrap().deleted);
    assert!(matches!(root.link(alice, "g", &file, false), Err(FsError::Deleted(_))));

    root.purge_forever(alice).unwrap();
    assert!(matches!(root.read_dir(alice), Err(FsError::Deleted(_))));
}
