//! Per-kind apply and undo.
//!
//! Every executor checks its preconditions, captures the minimal pre-image,
//! then mutates through as few platform primitives as the kind allows (a
//! single `rename` for a same-device move, a single `write` for a file). If
//! the mutation itself fails part-way, the executor puts back what it
//! touched before reporting the failure, so a failed operation never needs
//! an undo entry.

use crate::error::{OperationError, RollbackError};
use crate::fs::operation::{Action, NewEntry};
use crate::fs::platform::{EntryKind, Platform};
use crate::fs::undo::{
    Snapshot, UndoAction, copy_tree, ensure_parents, remove_created_parents, remove_tree,
};

use std::io;
use std::path::Path;

/// Read-only view of the namespace used to check preconditions.
///
/// The live filesystem is one implementation; pre-flight simulation is
/// another.
pub trait Namespace {
    fn probe(&self, path: &Path) -> io::Result<Option<EntryKind>>;
}

/// The namespace as it currently is on disk.
pub struct Live<'a>(pub &'a dyn Platform);

impl Namespace for Live<'_> {
    fn probe(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        Ok(self.0.stat(path)?.map(|stat| stat.kind))
    }
}

/// Checks that need no filesystem access.
pub fn check_structure(action: &Action) -> io::Result<()> {
    if let Action::Move { from, to } | Action::Copy { from, to } = action {
        if from == to {
            return Err(invalid("source and destination are the same path"));
        }
        if to.starts_with(from) {
            return Err(invalid("destination is inside the source"));
        }
    }
    Ok(())
}

/// Checks the existence expectations of `action` against `ns`.
pub fn check_preconditions(action: &Action, ns: &dyn Namespace) -> io::Result<()> {
    check_structure(action)?;

    match action {
        Action::Create { path, .. } => {
            if ns.probe(path)?.is_some() {
                return Err(exists("target already exists"));
            }
        }
        Action::Write { path, .. } => match ns.probe(path)? {
            Some(EntryKind::Dir) => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    "target is a directory",
                ));
            }
            Some(EntryKind::Other) => return Err(invalid("target is not a regular file")),
            _ => {}
        },
        Action::Delete { path } | Action::Chmod { path, .. } => match ns.probe(path)? {
            None => return Err(missing("target does not exist")),
            Some(EntryKind::Other) if matches!(action, Action::Delete { .. }) => {
                return Err(invalid("target is not a regular file or directory"));
            }
            _ => {}
        },
        Action::Move { from, to } => {
            if ns.probe(from)?.is_none() {
                return Err(missing("source does not exist"));
            }
            if ns.probe(to)?.is_some() {
                return Err(exists("destination already exists"));
            }
        }
        Action::Copy { from, to } => {
            let source = match ns.probe(from)? {
                None => return Err(missing("source does not exist")),
                Some(EntryKind::Other) => {
                    return Err(invalid("source is not a regular file or directory"));
                }
                Some(kind) => kind,
            };
            match (source, ns.probe(to)?) {
                (_, None) | (EntryKind::File, Some(EntryKind::File)) => {}
                (_, Some(EntryKind::Dir)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::IsADirectory,
                        "destination is a directory",
                    ));
                }
                (_, Some(_)) => return Err(exists("destination already exists")),
            }
        }
    }

    Ok(())
}

/// Applies `action` and returns its inverse.
pub fn apply(action: &Action, platform: &dyn Platform) -> Result<UndoAction, OperationError> {
    let kind = action.kind();
    let fail = |e: io::Error| OperationError::new(kind, action.path(), e);

    check_preconditions(action, &Live(platform)).map_err(fail)?;

    match action {
        Action::Create { path, entry } => create(platform, path, entry),
        Action::Write { path, content } => write(platform, path, content),
        Action::Delete { path } => delete(platform, path),
        Action::Move { from, to } => move_entry(platform, from, to),
        Action::Copy { from, to } => copy(platform, from, to),
        Action::Chmod { path, mode } => chmod(platform, path, *mode),
    }
    .map_err(fail)
}

/// Bytes an action writes, for monitoring.
pub fn payload_size(action: &Action) -> Option<u64> {
    match action {
        Action::Write { content, .. }
        | Action::Create {
            entry: NewEntry::File(content),
            ..
        } => Some(content.len() as u64),
        _ => None,
    }
}

fn create(platform: &dyn Platform, path: &Path, entry: &NewEntry) -> io::Result<UndoAction> {
    let parents = ensure_parents(platform, path)?;

    let result = match entry {
        NewEntry::File(content) => platform.write(path, content),
        NewEntry::Dir => platform.mkdir(path),
    };
    if let Err(e) = result {
        remove_created_parents(platform, &parents).ok();
        return Err(e);
    }

    Ok(UndoAction::Create {
        path: path.to_path_buf(),
        directory: matches!(entry, NewEntry::Dir),
        parents,
    })
}

fn write(platform: &dyn Platform, path: &Path, content: &[u8]) -> io::Result<UndoAction> {
    let prior = Snapshot::capture_if_exists(platform, path)?;
    let parents = if prior.is_none() {
        ensure_parents(platform, path)?
    } else {
        Vec::new()
    };

    if let Err(e) = platform.write(path, content) {
        match &prior {
            Some(snapshot) => {
                snapshot.restore(platform, path).ok();
            }
            None => {
                platform.remove_file(path).ok();
                remove_created_parents(platform, &parents).ok();
            }
        }
        return Err(e);
    }

    Ok(UndoAction::Write {
        path: path.to_path_buf(),
        prior,
        parents,
    })
}

fn delete(platform: &dyn Platform, path: &Path) -> io::Result<UndoAction> {
    let snapshot = Snapshot::capture(platform, path)?;

    if let Err(e) = remove_tree(platform, path) {
        if let Err(restore_err) = snapshot.restore(platform, path) {
            log::error!(
                "Delete of {} failed part-way and could not be restored: {}",
                path.display(),
                restore_err
            );
        }
        return Err(e);
    }

    Ok(UndoAction::Delete {
        path: path.to_path_buf(),
        snapshot,
    })
}

fn move_entry(platform: &dyn Platform, from: &Path, to: &Path) -> io::Result<UndoAction> {
    let parents = ensure_parents(platform, to)?;

    let result = if platform.same_filesystem(from, to) {
        platform.rename(from, to)
    } else {
        log::debug!(
            "{} and {} are on different devices, copying",
            from.display(),
            to.display()
        );
        move_across_devices(platform, from, to)
    };

    if let Err(e) = result {
        remove_created_parents(platform, &parents).ok();
        return Err(e);
    }

    Ok(UndoAction::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        parents,
    })
}

/// Copy then remove. On failure the source is restored and the copy dropped.
fn move_across_devices(platform: &dyn Platform, from: &Path, to: &Path) -> io::Result<()> {
    let snapshot = Snapshot::capture(platform, from)?;

    let result = copy_tree(platform, from, to).and_then(|_| remove_tree(platform, from));
    if result.is_err() {
        if platform.stat(to).ok().flatten().is_some() {
            remove_tree(platform, to).ok();
        }
        snapshot.restore(platform, from).ok();
    }
    result
}

fn copy(platform: &dyn Platform, from: &Path, to: &Path) -> io::Result<UndoAction> {
    let prior = Snapshot::capture_if_exists(platform, to)?;
    let parents = if prior.is_none() {
        ensure_parents(platform, to)?
    } else {
        Vec::new()
    };

    if let Err(e) = copy_tree(platform, from, to) {
        match &prior {
            Some(snapshot) => {
                snapshot.restore(platform, to).ok();
            }
            None => {
                if platform.stat(to).ok().flatten().is_some() {
                    remove_tree(platform, to).ok();
                }
                remove_created_parents(platform, &parents).ok();
            }
        }
        return Err(e);
    }

    Ok(UndoAction::Copy {
        to: to.to_path_buf(),
        prior,
        parents,
    })
}

fn chmod(platform: &dyn Platform, path: &Path, mode: u32) -> io::Result<UndoAction> {
    let stat = platform
        .stat(path)?
        .ok_or_else(|| crate::fs::undo::not_found(path))?;

    platform.set_mode(path, mode)?;

    Ok(UndoAction::Chmod {
        path: path.to_path_buf(),
        mode: stat.mode,
    })
}

/// Replays one undo action.
pub fn undo(action: &UndoAction, platform: &dyn Platform) -> Result<(), RollbackError> {
    let kind = action.kind();

    let result = match action {
        UndoAction::Create {
            path,
            directory,
            parents,
        } => {
            let removed = if *directory {
                platform.remove_dir(path)
            } else {
                platform.remove_file(path)
            };
            removed.and_then(|_| remove_created_parents(platform, parents))
        }
        UndoAction::Write {
            path,
            prior,
            parents,
        } => match prior {
            Some(snapshot) => snapshot.restore(platform, path),
            None => platform
                .remove_file(path)
                .and_then(|_| remove_created_parents(platform, parents)),
        },
        UndoAction::Delete { path, snapshot } => {
            ensure_vacant(platform, path).and_then(|_| snapshot.restore(platform, path))
        }
        UndoAction::Move { from, to, parents } => ensure_vacant(platform, from)
            .and_then(|_| {
                if platform.same_filesystem(to, from) {
                    platform.rename(to, from)
                } else {
                    move_across_devices(platform, to, from)
                }
            })
            .and_then(|_| remove_created_parents(platform, parents)),
        UndoAction::Copy { to, prior, parents } => {
            remove_tree(platform, to).and_then(|_| match prior {
                Some(snapshot) => snapshot.restore(platform, to),
                None => remove_created_parents(platform, parents),
            })
        }
        UndoAction::Chmod { path, mode } => platform.set_mode(path, *mode),
    };

    result.map_err(|e| RollbackError::io(kind, action.path(), e))
}

fn ensure_vacant(platform: &dyn Platform, path: &Path) -> io::Result<()> {
    match platform.stat(path)? {
        Some(_) => Err(exists(&format!("{} is occupied", path.display()))),
        None => Ok(()),
    }
}

fn exists(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::AlreadyExists, msg.to_string())
}

fn missing(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, msg.to_string())
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::platform::HostFs;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn file_action(path: PathBuf, content: &str) -> Action {
        Action::Create {
            path,
            entry: NewEntry::File(content.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_create_file_with_parents_and_undo() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a/x.txt");

        let undo_action = apply(&file_action(file.clone(), "hi"), &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "hi");

        undo(&undo_action, &HostFs).unwrap();
        assert!(!file.exists());
        assert!(!temp.path().join("a").exists());
    }

    #[test]
    fn test_create_existing_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("x.txt");
        fs::write(&file, "old").unwrap();

        let err = apply(&file_action(file.clone(), "new"), &HostFs).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&file).unwrap(), "old");
    }

    #[test]
    fn test_create_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("d");

        let action = Action::Create {
            path: dir.clone(),
            entry: NewEntry::Dir,
        };
        let undo_action = apply(&action, &HostFs).unwrap();
        assert!(dir.is_dir());

        undo(&undo_action, &HostFs).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_write_restores_prior_content() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        fs::write(&file, "before").unwrap();

        let action = Action::Write {
            path: file.clone(),
            content: b"after".to_vec(),
        };
        let undo_action = apply(&action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "after");

        undo(&undo_action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "before");

        // Restoring the same pre-image again changes nothing.
        undo(&undo_action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "before");
    }

    #[test]
    fn test_write_new_file_undo_removes_it() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("new.txt");

        let action = Action::Write {
            path: file.clone(),
            content: b"x".to_vec(),
        };
        let undo_action = apply(&action, &HostFs).unwrap();
        undo(&undo_action, &HostFs).unwrap();

        assert!(!file.exists());
        assert!(undo(&undo_action, &HostFs).is_err());
    }

    #[test]
    fn test_write_to_directory_fails() {
        let temp = TempDir::new().unwrap();
        let action = Action::Write {
            path: temp.path().to_path_buf(),
            content: b"x".to_vec(),
        };

        let err = apply(&action, &HostFs).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::IsADirectory);
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_restores_content_and_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        fs::write(&file, "keep me").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();

        let undo_action = apply(&Action::Delete { path: file.clone() }, &HostFs).unwrap();
        assert!(!file.exists());

        undo(&undo_action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "keep me");
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_delete_directory_tree() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("d");
        fs::create_dir_all(dir.join("e")).unwrap();
        fs::write(dir.join("e/f.txt"), "deep").unwrap();

        let undo_action = apply(&Action::Delete { path: dir.clone() }, &HostFs).unwrap();
        assert!(!dir.exists());

        undo(&undo_action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(dir.join("e/f.txt")).unwrap(), "deep");

        // The path is occupied again, so a second replay is refused.
        assert!(undo(&undo_action, &HostFs).is_err());
    }

    #[test]
    fn test_delete_missing_fails() {
        let temp = TempDir::new().unwrap();
        let action = Action::Delete {
            path: temp.path().join("missing.txt"),
        };

        let err = apply(&action, &HostFs).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_move_and_move_back() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("a");
        let to = temp.path().join("nested/b");
        fs::write(&from, "payload").unwrap();

        let action = Action::Move {
            from: from.clone(),
            to: to.clone(),
        };
        let undo_action = apply(&action, &HostFs).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "payload");

        undo(&undo_action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&from).unwrap(), "payload");
        assert!(!temp.path().join("nested").exists());
    }

    #[test]
    fn test_move_onto_existing_fails() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("a");
        let to = temp.path().join("b");
        fs::write(&from, "a").unwrap();
        fs::write(&to, "b").unwrap();

        let err = apply(&Action::Move { from, to: to.clone() }, &HostFs).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&to).unwrap(), "b");
    }

    #[test]
    fn test_move_into_own_subtree_rejected() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("d");
        fs::create_dir(&from).unwrap();

        let action = Action::Move {
            from: from.clone(),
            to: from.join("inner"),
        };
        assert!(check_structure(&action).is_err());
    }

    #[test]
    fn test_copy_over_existing_file_and_undo() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("src.txt");
        let to = temp.path().join("dst.txt");
        fs::write(&from, "new").unwrap();
        fs::write(&to, "old").unwrap();

        let action = Action::Copy {
            from: from.clone(),
            to: to.clone(),
        };
        let undo_action = apply(&action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&to).unwrap(), "new");

        undo(&undo_action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(&to).unwrap(), "old");
        assert_eq!(fs::read_to_string(&from).unwrap(), "new");
    }

    #[test]
    fn test_copy_directory_and_undo() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("src");
        fs::create_dir(&from).unwrap();
        fs::write(from.join("f.txt"), "x").unwrap();
        let to = temp.path().join("out/dst");

        let action = Action::Copy {
            from: from.clone(),
            to: to.clone(),
        };
        let undo_action = apply(&action, &HostFs).unwrap();
        assert_eq!(fs::read_to_string(to.join("f.txt")).unwrap(), "x");

        undo(&undo_action, &HostFs).unwrap();
        assert!(!temp.path().join("out").exists());
        assert!(from.join("f.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_chmod_and_undo() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        let action = Action::Chmod {
            path: file.clone(),
            mode: 0o600,
        };
        let undo_action = apply(&action, &HostFs).unwrap();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&file), 0o600);

        undo(&undo_action, &HostFs).unwrap();
        assert_eq!(mode(&file), 0o644);
    }

    #[test]
    fn test_payload_size() {
        let write = Action::Write {
            path: PathBuf::from("/x"),
            content: b"abc".to_vec(),
        };
        assert_eq!(payload_size(&write), Some(3));
        assert_eq!(
            payload_size(&Action::Delete {
                path: PathBuf::from("/x")
            }),
            None
        );
    }
}
