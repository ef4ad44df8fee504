#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fileq_core::undo::{TransferOp, UndoRecord};
use fileq_core::{
    Direction, FileOperations, JobQueue, LocalTrash, Location, OpOptions, TrashBackend,
    ThreadScheduler, UndoError, UndoInfo, UndoManager, UndoOp, UndoState,
};

fn make_temp_dir(label: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    let root = env::temp_dir().join(format!("fileq-undo-it-{label}-{stamp}"));
    fs::create_dir_all(&root).expect("temp root should be creatable");
    root
}

fn operations(root: &Path) -> FileOperations {
    let queue = JobQueue::new(Arc::new(ThreadScheduler::new("fileq-it")));
    FileOperations::new(queue, Arc::new(LocalTrash::new(root.join(".trash"))))
}

async fn apply(info: &mut UndoInfo, ops: &FileOperations, direction: Direction) {
    let handle = info
        .apply_async(ops, direction)
        .expect("apply should start");
    let outcome = info
        .apply_finish(handle)
        .await
        .expect("apply should succeed");
    assert!(outcome.success, "{direction:?} should succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn copy_three_files_then_undo_and_redo() {
    let root = make_temp_dir("copy");
    let ops = operations(&root);
    let source_dir = root.join("src");
    let destination_dir = root.join("dst");
    fs::create_dir_all(&source_dir).expect("source dir should be creatable");
    fs::create_dir_all(&destination_dir).expect("destination dir should be creatable");
    let sources: Vec<Location> = ["one.txt", "two.txt", "three.txt"]
        .iter()
        .map(|name| {
            let path = source_dir.join(name);
            fs::write(&path, name).expect("source file should be written");
            Location::new(path)
        })
        .collect();

    let report = ops
        .copy(sources, Location::new(&destination_dir), &OpOptions::default())
        .wait()
        .await
        .expect("copy should succeed");
    let info = report.undo_info.expect("copy should record undo info");
    assert_eq!(info.op(), UndoOp::Copy);
    assert_eq!(info.item_count(), 3);
    assert_eq!(info.get_strings().undo_description, "Delete 3 copied items");

    let mut manager = UndoManager::default();
    manager.set_action(info);

    manager.undo(&ops).await.expect("undo should succeed");
    for name in ["one.txt", "two.txt", "three.txt"] {
        assert!(!destination_dir.join(name).exists(), "{name} should be deleted");
        assert!(source_dir.join(name).exists(), "{name} source should remain");
    }
    assert_eq!(manager.state(), UndoState::Redo);

    manager.redo(&ops).await.expect("redo should succeed");
    for name in ["one.txt", "two.txt", "three.txt"] {
        assert_eq!(
            fs::read_to_string(destination_dir.join(name)).expect("copy should exist again"),
            name
        );
    }
    assert_eq!(manager.state(), UndoState::Undo);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn trash_undo_restores_only_the_matching_deletion() {
    let root = make_temp_dir("trash-times");
    let ops = operations(&root);
    let note = root.join("x.txt");

    fs::write(&note, "first").expect("first note should be written");
    let first = ops
        .trash(vec![Location::new(&note)], &OpOptions::default())
        .wait()
        .await
        .expect("first trash should succeed");
    let mut first_info = first.undo_info.expect("trash should record undo info");

    // Trash timestamps have one-second resolution.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    fs::write(&note, "second").expect("second note should be written");
    let second = ops
        .trash(vec![Location::new(&note)], &OpOptions::default())
        .wait()
        .await
        .expect("second trash should succeed");
    let mut second_info = second.undo_info.expect("trash should record undo info");
    assert_ne!(first.trashed[0].deleted_at, second.trashed[0].deleted_at);

    apply(&mut second_info, &ops, Direction::Undo).await;
    assert_eq!(
        fs::read_to_string(&note).expect("second note should be restored"),
        "second"
    );
    assert_eq!(
        ops.trash_backend().list().expect("trash should list").len(),
        1,
        "first deletion should still be in the trash"
    );

    fs::remove_file(&note).expect("restored note should be removable");
    apply(&mut first_info, &ops, Direction::Undo).await;
    assert_eq!(
        fs::read_to_string(&note).expect("first note should be restored"),
        "first"
    );

    let handle = first_info
        .apply_async(&ops, Direction::Undo)
        .expect("apply should start");
    let outcome = first_info
        .apply_finish(handle)
        .await
        .expect("an empty match is not an error");
    assert!(outcome.success);
    assert_eq!(outcome.skipped, 1, "nothing left in the trash to restore");

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn trash_redo_records_new_deletion_times() {
    let root = make_temp_dir("trash-redo");
    let ops = operations(&root);
    let note = root.join("note.txt");
    fs::write(&note, "text").expect("note should be written");

    let report = ops
        .trash(vec![Location::new(&note)], &OpOptions::default())
        .wait()
        .await
        .expect("trash should succeed");
    let mut info = report.undo_info.expect("trash should record undo info");

    apply(&mut info, &ops, Direction::Undo).await;
    assert!(note.exists());
    apply(&mut info, &ops, Direction::Redo).await;
    assert!(!note.exists());
    apply(&mut info, &ops, Direction::Undo).await;
    assert!(note.exists(), "redo should have recorded the new trash entry");

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn restore_from_trash_round_trips_through_new_trash_ids() {
    let root = make_temp_dir("restore");
    let ops = operations(&root);
    let file = root.join("doc.txt");
    fs::write(&file, "doc").expect("file should be written");

    let trashed = ops
        .trash(vec![Location::new(&file)], &OpOptions::replay())
        .wait()
        .await
        .expect("trash should succeed")
        .trashed;
    let report = ops
        .restore_from_trash(trashed, &OpOptions::default())
        .wait()
        .await
        .expect("restore should succeed");
    let mut info = report.undo_info.expect("restore should record undo info");
    assert!(file.exists());

    apply(&mut info, &ops, Direction::Undo).await;
    assert!(!file.exists(), "undo should put the file back in the trash");
    let UndoRecord::Transfer(record) = info.record() else {
        panic!("expected a transfer record");
    };
    assert_eq!(record.op, TransferOp::RestoreFromTrash);
    assert!(record.sources[0].exists(), "source should be the new trash id");

    apply(&mut info, &ops, Direction::Redo).await;
    assert_eq!(fs::read_to_string(&file).expect("file should be back"), "doc");

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_round_trips_base_name() {
    let root = make_temp_dir("rename");
    let ops = operations(&root);
    let old = root.join("draft.txt");
    fs::write(&old, "text").expect("file should be written");

    let report = ops
        .rename(Location::new(&old), "final.txt", &OpOptions::default())
        .wait()
        .await
        .expect("rename should succeed");
    let mut info = report.undo_info.expect("rename should record undo info");
    assert!(root.join("final.txt").exists());

    apply(&mut info, &ops, Direction::Undo).await;
    assert!(old.exists());
    assert!(!root.join("final.txt").exists());

    apply(&mut info, &ops, Direction::Redo).await;
    assert!(!old.exists());
    assert!(root.join("final.txt").exists());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_redo_tracks_new_copy_names() {
    let root = make_temp_dir("duplicate");
    let ops = operations(&root);
    let file = root.join("a.txt");
    fs::write(&file, "a").expect("file should be written");

    let report = ops
        .duplicate(vec![Location::new(&file)], &OpOptions::default())
        .wait()
        .await
        .expect("duplicate should succeed");
    let mut info = report.undo_info.expect("duplicate should record undo info");
    let copy = root.join("a (copy).txt");
    assert!(copy.exists());

    apply(&mut info, &ops, Direction::Undo).await;
    assert!(!copy.exists());
    apply(&mut info, &ops, Direction::Redo).await;
    assert!(copy.exists());
    apply(&mut info, &ops, Direction::Undo).await;
    assert!(!copy.exists());
    assert!(file.exists());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn recursive_permissions_restore_original_modes() {
    use std::os::unix::fs::PermissionsExt;

    let mode_of = |path: &Path| {
        fs::metadata(path)
            .expect("metadata should be readable")
            .permissions()
            .mode()
            & 0o7777
    };
    let root = make_temp_dir("rec-perms");
    let ops = operations(&root);
    let dir = root.join("D");
    fs::create_dir_all(&dir).expect("directory should be creatable");
    let file_a = dir.join("a");
    let file_b = dir.join("b");
    fs::write(&file_a, "a").expect("a should be written");
    fs::write(&file_b, "b").expect("b should be written");
    fs::set_permissions(&file_a, fs::Permissions::from_mode(0o644)).expect("a mode should set");
    fs::set_permissions(&file_b, fs::Permissions::from_mode(0o755)).expect("b mode should set");
    let dir_mode = mode_of(&dir);

    let report = ops
        .set_permissions_recursive(
            Location::new(&dir),
            0o600,
            0o777,
            0,
            0,
            &OpOptions::default(),
        )
        .wait()
        .await
        .expect("recursive chmod should succeed");
    let mut info = report.undo_info.expect("chmod should record undo info");
    assert_eq!(mode_of(&file_a), 0o600);
    assert_eq!(mode_of(&file_b), 0o600);
    assert_eq!(mode_of(&dir), dir_mode, "zero dir mask leaves the directory alone");

    apply(&mut info, &ops, Direction::Undo).await;
    assert_eq!(mode_of(&file_a), 0o644);
    assert_eq!(mode_of(&file_b), 0o755);

    apply(&mut info, &ops, Direction::Redo).await;
    assert_eq!(mode_of(&file_a), 0o600);
    assert_eq!(mode_of(&file_b), 0o600);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn single_permission_change_round_trips() {
    use std::os::unix::fs::PermissionsExt;

    let root = make_temp_dir("perms");
    let ops = operations(&root);
    let file = root.join("script.sh");
    fs::write(&file, "#!/bin/sh\n").expect("file should be written");
    fs::set_permissions(&file, fs::Permissions::from_mode(0o640)).expect("mode should set");

    let report = ops
        .set_permissions(Location::new(&file), 0o750, &OpOptions::default())
        .wait()
        .await
        .expect("chmod should succeed");
    let mut info = report.undo_info.expect("chmod should record undo info");
    let mode = || {
        fs::metadata(&file)
            .expect("metadata should be readable")
            .permissions()
            .mode()
            & 0o7777
    };
    assert_eq!(mode(), 0o750);

    apply(&mut info, &ops, Direction::Undo).await;
    assert_eq!(mode(), 0o640);
    apply(&mut info, &ops, Direction::Redo).await;
    assert_eq!(mode(), 0o750);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_applies_are_rejected() {
    let root = make_temp_dir("overlap");
    let ops = operations(&root);
    let report = ops
        .new_folder(Location::new(&root), "made", &OpOptions::default())
        .wait()
        .await
        .expect("folder should be created");
    let mut info = report.undo_info.expect("create should record undo info");

    let handle = info
        .apply_async(&ops, Direction::Undo)
        .expect("first apply should start");
    assert_eq!(
        info.apply_async(&ops, Direction::Undo)
            .expect_err("second apply should be rejected"),
        UndoError::ApplyInFlight
    );
    info.apply_finish(handle)
        .await
        .expect("first apply should finish");
    assert!(!info.is_applying());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_and_failure_are_told_apart() {
    let root = make_temp_dir("cancel-fail");
    let ops = operations(&root);
    let source = root.join("a.txt");
    fs::write(&source, "a").expect("source should be written");
    fs::create_dir_all(root.join("out")).expect("out dir should be creatable");

    let report = ops
        .copy(
            vec![Location::new(&source)],
            Location::new(root.join("out")),
            &OpOptions::default(),
        )
        .wait()
        .await
        .expect("copy should succeed");
    let mut info = report.undo_info.expect("copy should record undo info");
    apply(&mut info, &ops, Direction::Undo).await;

    let cancelled = OpOptions::replay();
    cancelled.cancel.cancel();
    let handle = info
        .apply_async_with(&ops, Direction::Redo, cancelled)
        .expect("apply should start");
    let outcome = info
        .apply_finish(handle)
        .await
        .expect("cancellation is reported as an outcome");
    assert!(!outcome.success);
    assert!(outcome.user_cancelled);
    assert!(!root.join("out/a.txt").exists());

    fs::remove_file(&source).expect("source should be removable");
    let handle = info
        .apply_async(&ops, Direction::Redo)
        .expect("apply should start");
    let error = info
        .apply_finish(handle)
        .await
        .expect_err("redo of a missing source should fail");
    assert!(matches!(error, UndoError::Operation(_)));

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn recursive_permissions_can_close_directories_and_reopen_them() {
    use std::os::unix::fs::PermissionsExt;

    let mode_of = |path: &Path| {
        fs::metadata(path)
            .expect("metadata should be readable")
            .permissions()
            .mode()
            & 0o7777
    };
    let set_mode = |path: &Path, mode: u32| {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("mode should set");
    };
    let root = make_temp_dir("rec-perms-closed");
    let ops = operations(&root);
    let dir = root.join("D");
    let sub = dir.join("sub");
    fs::create_dir_all(&sub).expect("directories should be creatable");
    fs::write(dir.join("a"), "a").expect("a should be written");
    fs::write(sub.join("b"), "b").expect("b should be written");
    set_mode(&dir.join("a"), 0o644);
    set_mode(&sub.join("b"), 0o640);
    set_mode(&sub, 0o755);
    set_mode(&dir, 0o755);

    let report = ops
        .set_permissions_recursive(
            Location::new(&dir),
            0o600,
            0o777,
            0o600,
            0o777,
            &OpOptions::default(),
        )
        .wait()
        .await
        .expect("closing the tree should succeed");
    let mut info = report.undo_info.expect("chmod should record undo info");
    assert_eq!(mode_of(&dir), 0o600);

    let handle = info
        .apply_async(&ops, Direction::Undo)
        .expect("undo should start");
    let outcome = info
        .apply_finish(handle)
        .await
        .expect("undo should succeed");
    assert!(outcome.success);
    assert_eq!(outcome.skipped, 0, "every entry should be restored");
    assert_eq!(mode_of(&dir), 0o755);
    assert_eq!(mode_of(&dir.join("a")), 0o644);
    assert_eq!(mode_of(&sub), 0o755);
    assert_eq!(mode_of(&sub.join("b")), 0o640);

    apply(&mut info, &ops, Direction::Redo).await;
    assert_eq!(mode_of(&dir), 0o600);
    set_mode(&dir, 0o755);
    assert_eq!(mode_of(&dir.join("a")), 0o600);
    assert_eq!(mode_of(&sub), 0o600);
    set_mode(&sub, 0o755);
    assert_eq!(mode_of(&sub.join("b")), 0o600);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_copy_is_undone_through_the_history() {
    let root = make_temp_dir("partial-copy");
    let ops = operations(&root);
    fs::write(root.join("a.txt"), "a").expect("source should be written");
    fs::create_dir_all(root.join("out")).expect("out dir should be creatable");

    let failure = ops
        .copy(
            vec![
                Location::new(root.join("a.txt")),
                Location::new(root.join("missing.txt")),
            ],
            Location::new(root.join("out")),
            &OpOptions::default(),
        )
        .wait_report()
        .await
        .expect_err("copy should fail on the missing file");
    assert!(root.join("out/a.txt").exists());

    let mut manager = UndoManager::default();
    manager.set_action(
        failure
            .partial
            .undo_info
            .expect("the copied file should be undoable"),
    );
    manager.undo(&ops).await.expect("undo should succeed");
    assert!(!root.join("out/a.txt").exists());
    assert!(root.join("a.txt").exists());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn move_undo_returns_files_to_their_source() {
    let root = make_temp_dir("move");
    let ops = operations(&root);
    let source_dir = root.join("src");
    let destination_dir = root.join("dst");
    fs::create_dir_all(&source_dir).expect("source dir should be creatable");
    fs::create_dir_all(&destination_dir).expect("destination dir should be creatable");
    let sources: Vec<Location> = ["a.txt", "b.txt"]
        .iter()
        .map(|name| {
            let path = source_dir.join(name);
            fs::write(&path, name).expect("source should be written");
            Location::new(path)
        })
        .collect();

    let report = ops
        .move_to(sources, Location::new(&destination_dir), &OpOptions::default())
        .wait()
        .await
        .expect("move should succeed");
    let mut info = report.undo_info.expect("move should record undo info");
    assert_eq!(info.op(), UndoOp::Move);

    apply(&mut info, &ops, Direction::Undo).await;
    for name in ["a.txt", "b.txt"] {
        assert!(source_dir.join(name).exists(), "{name} should be back");
        assert!(!destination_dir.join(name).exists());
    }

    apply(&mut info, &ops, Direction::Redo).await;
    for name in ["a.txt", "b.txt"] {
        assert_eq!(
            fs::read_to_string(destination_dir.join(name)).expect("moved file should read"),
            name
        );
        assert!(!source_dir.join(name).exists());
    }

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn link_round_trips() {
    let root = make_temp_dir("link");
    let ops = operations(&root);
    let target = root.join("target.txt");
    fs::write(&target, "target").expect("target should be written");
    fs::create_dir_all(root.join("links")).expect("links dir should be creatable");

    let report = ops
        .link(
            vec![Location::new(&target)],
            Location::new(root.join("links")),
            &OpOptions::default(),
        )
        .wait()
        .await
        .expect("link should succeed");
    let link = report.created[0].path().to_path_buf();
    let mut info = report.undo_info.expect("link should record undo info");
    assert_eq!(info.op(), UndoOp::CreateLink);
    let is_link = |path: &Path| {
        fs::symlink_metadata(path).is_ok_and(|metadata| metadata.file_type().is_symlink())
    };
    assert!(is_link(&link));

    apply(&mut info, &ops, Direction::Undo).await;
    assert!(fs::symlink_metadata(&link).is_err(), "link should be removed");
    assert!(target.exists(), "link target should survive");

    apply(&mut info, &ops, Direction::Redo).await;
    let UndoRecord::Transfer(record) = info.record() else {
        panic!("link should keep a transfer record");
    };
    assert_eq!(record.destinations.len(), 1);
    assert!(is_link(record.destinations[0].path()));

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[tokio::test(flavor = "multi_thread")]
async fn template_file_round_trips() {
    let root = make_temp_dir("template");
    let ops = operations(&root);
    let template = root.join("letter.tmpl");
    fs::write(&template, "Dear reader,\n").expect("template should be written");
    let created = root.join("letter.txt");

    let report = ops
        .new_file_from_template(
            Location::new(&root),
            "letter.txt",
            Location::new(&template),
            &OpOptions::default(),
        )
        .wait()
        .await
        .expect("file from template should be created");
    let mut info = report.undo_info.expect("create should record undo info");
    assert_eq!(info.op(), UndoOp::CreateFromTemplate);

    apply(&mut info, &ops, Direction::Undo).await;
    assert!(!created.exists());

    apply(&mut info, &ops, Direction::Redo).await;
    assert_eq!(
        fs::read_to_string(&created).expect("recreated file should read"),
        "Dear reader,\n"
    );

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn ownership_round_trips_with_current_owner_and_group() {
    use fileq_core::fs_ops::{group_name, owner_name};

    let root = make_temp_dir("ownership");
    let ops = operations(&root);
    let file = root.join("owned.txt");
    fs::write(&file, "owned").expect("file should be written");
    let owner = owner_name(&file).expect("owner should resolve");
    let group = group_name(&file).expect("group should resolve");

    let report = ops
        .set_owner(Location::new(&file), &owner, &OpOptions::default())
        .wait()
        .await
        .expect("chown to the current owner should succeed");
    let mut owner_info = report.undo_info.expect("chown should record undo info");
    assert_eq!(owner_info.op(), UndoOp::ChangeOwner);
    apply(&mut owner_info, &ops, Direction::Undo).await;
    apply(&mut owner_info, &ops, Direction::Redo).await;
    assert_eq!(owner_name(&file).expect("owner should resolve"), owner);

    let report = ops
        .set_group(Location::new(&file), &group, &OpOptions::default())
        .wait()
        .await
        .expect("chgrp to the current group should succeed");
    let mut group_info = report.undo_info.expect("chgrp should record undo info");
    assert_eq!(group_info.op(), UndoOp::ChangeGroup);
    assert!(group_info.get_strings().undo_description.contains("owned.txt"));
    apply(&mut group_info, &ops, Direction::Undo).await;
    apply(&mut group_info, &ops, Direction::Redo).await;
    assert_eq!(group_name(&file).expect("group should resolve"), group);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}
