//! Pre-images, undo actions and the per-transaction undo log.
//!
//! An [`UndoAction`] exists for an operation if and only if that operation
//! reached `applied`. Actions are appended in apply order and replayed LIFO
//! by the rollback executor.

use crate::error::RollbackError;
use crate::fs::executor;
use crate::fs::operation::OperationKind;
use crate::fs::platform::{EntryKind, Platform};

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Captured prior state of one entry, recursive for directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    File {
        content: Vec<u8>,
        mode: u32,
    },
    Dir {
        mode: u32,
        entries: Vec<(OsString, Snapshot)>,
    },
}

impl Snapshot {
    /// Reads the full content and permission bits of `path` (and everything
    /// beneath it for a directory).
    pub fn capture(platform: &dyn Platform, path: &Path) -> io::Result<Self> {
        let stat = platform.stat(path)?.ok_or_else(|| not_found(path))?;

        match stat.kind {
            EntryKind::File => Ok(Snapshot::File {
                content: platform.read(path)?,
                mode: stat.mode,
            }),
            EntryKind::Dir => {
                let entries = platform
                    .list_dir(path)?
                    .into_iter()
                    .map(|name| {
                        let child = Snapshot::capture(platform, &path.join(&name))?;
                        Ok((name, child))
                    })
                    .collect::<io::Result<Vec<_>>>()?;
                Ok(Snapshot::Dir {
                    mode: stat.mode,
                    entries,
                })
            }
            EntryKind::Other => Err(unsupported(path)),
        }
    }

    /// Captures `path` if something exists there.
    pub fn capture_if_exists(platform: &dyn Platform, path: &Path) -> io::Result<Option<Self>> {
        match platform.stat(path)? {
            Some(_) => Snapshot::capture(platform, path).map(Some),
            None => Ok(None),
        }
    }

    /// Writes the snapshot back to `path`.
    ///
    /// Directories that already exist are reused and files are overwritten, so
    /// restoring over a partially removed tree fills in what is missing.
    /// Directory modes are applied after their children so read-only
    /// directories can be restored.
    pub fn restore(&self, platform: &dyn Platform, path: &Path) -> io::Result<()> {
        match self {
            Snapshot::File { content, mode } => {
                platform.write(path, content)?;
                platform.set_mode(path, *mode)
            }
            Snapshot::Dir { mode, entries } => {
                match platform.stat(path)? {
                    Some(stat) if stat.kind == EntryKind::Dir => {}
                    Some(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("{} exists and is not a directory", path.display()),
                        ));
                    }
                    None => platform.mkdir(path)?,
                }
                for (name, child) in entries {
                    child.restore(platform, &path.join(name))?;
                }
                platform.set_mode(path, *mode)
            }
        }
    }

    /// Total bytes of file content in the snapshot.
    pub fn size(&self) -> u64 {
        match self {
            Snapshot::File { content, .. } => content.len() as u64,
            Snapshot::Dir { entries, .. } => entries.iter().map(|(_, s)| s.size()).sum(),
        }
    }
}

/// Missing ancestors of `path`, deepest first.
fn missing_parents(platform: &dyn Platform, path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut cursor = path.parent();

    while let Some(dir) = cursor {
        match platform.stat(dir)? {
            Some(stat) if stat.kind == EntryKind::Dir => break,
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} is not a directory", dir.display()),
                ));
            }
            None => missing.push(dir.to_path_buf()),
        }
        cursor = dir.parent();
    }

    Ok(missing)
}

/// The topmost ancestor of `path` that does not exist yet, i.e. the
/// directory [`ensure_parents`] would create first.
pub fn missing_ancestor(platform: &dyn Platform, path: &Path) -> io::Result<Option<PathBuf>> {
    Ok(missing_parents(platform, path)?.pop())
}

/// Creates every missing ancestor of `path`, top-down, and returns the
/// directories it created in that order.
///
/// A directory that appears between the `stat` and the `mkdir` belongs to
/// someone else: it is used but not recorded, so undo never removes it.
pub fn ensure_parents(platform: &dyn Platform, path: &Path) -> io::Result<Vec<PathBuf>> {
    let missing = missing_parents(platform, path)?;

    let mut created = Vec::with_capacity(missing.len());
    for dir in missing.into_iter().rev() {
        match platform.mkdir(&dir) {
            Ok(()) => created.push(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("{} appeared concurrently; not ours to remove", dir.display());
            }
            Err(e) => {
                remove_created_parents(platform, &created).ok();
                return Err(e);
            }
        }
    }

    Ok(created)
}

/// Removes directories recorded by [`ensure_parents`], deepest first.
/// Already-missing directories are skipped; non-empty ones are an error.
pub fn remove_created_parents(platform: &dyn Platform, created: &[PathBuf]) -> io::Result<()> {
    for dir in created.iter().rev() {
        match platform.remove_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Removes a file or a whole directory tree.
pub fn remove_tree(platform: &dyn Platform, path: &Path) -> io::Result<()> {
    let stat = platform.stat(path)?.ok_or_else(|| not_found(path))?;

    if stat.kind == EntryKind::Dir {
        for name in platform.list_dir(path)? {
            remove_tree(platform, &path.join(name))?;
        }
        platform.remove_dir(path)
    } else {
        platform.remove_file(path)
    }
}

/// Recursively copies `from` to `to`, preserving permission bits.
pub fn copy_tree(platform: &dyn Platform, from: &Path, to: &Path) -> io::Result<()> {
    let stat = platform.stat(from)?.ok_or_else(|| not_found(from))?;

    match stat.kind {
        EntryKind::File => {
            let content = platform.read(from)?;
            platform.write(to, &content)?;
            platform.set_mode(to, stat.mode)
        }
        EntryKind::Dir => {
            platform.mkdir(to)?;
            for name in platform.list_dir(from)? {
                copy_tree(platform, &from.join(&name), &to.join(&name))?;
            }
            platform.set_mode(to, stat.mode)
        }
        EntryKind::Other => Err(unsupported(from)),
    }
}

pub(crate) fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

pub(crate) fn unsupported(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not a regular file or directory", path.display()),
    )
}

/// Kind-specific inverse of one applied operation plus its pre-image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// Remove the created entry, then any parents created for it.
    Create {
        path: PathBuf,
        directory: bool,
        parents: Vec<PathBuf>,
    },
    /// Restore prior content, or remove the file if it did not exist.
    Write {
        path: PathBuf,
        prior: Option<Snapshot>,
        parents: Vec<PathBuf>,
    },
    /// Recreate the deleted entry from its snapshot.
    Delete { path: PathBuf, snapshot: Snapshot },
    /// Move the destination back to the source path.
    Move {
        from: PathBuf,
        to: PathBuf,
        parents: Vec<PathBuf>,
    },
    /// Remove the copy, then restore whatever was at the destination.
    Copy {
        to: PathBuf,
        prior: Option<Snapshot>,
        parents: Vec<PathBuf>,
    },
    /// Reapply prior permission bits.
    Chmod { path: PathBuf, mode: u32 },
}

impl UndoAction {
    pub fn kind(&self) -> OperationKind {
        match self {
            UndoAction::Create { .. } => OperationKind::Create,
            UndoAction::Write { .. } => OperationKind::Write,
            UndoAction::Delete { .. } => OperationKind::Delete,
            UndoAction::Move { .. } => OperationKind::Move,
            UndoAction::Copy { .. } => OperationKind::Copy,
            UndoAction::Chmod { .. } => OperationKind::Chmod,
        }
    }

    /// The path the undo step mutates.
    pub fn path(&self) -> &Path {
        match self {
            UndoAction::Create { path, .. }
            | UndoAction::Write { path, .. }
            | UndoAction::Delete { path, .. }
            | UndoAction::Chmod { path, .. } => path,
            UndoAction::Move { to, .. } | UndoAction::Copy { to, .. } => to,
        }
    }
}

/// One undo log record.
#[derive(Debug)]
pub struct UndoEntry {
    /// Index of the operation this entry reverses.
    pub index: usize,
    pub action: UndoAction,
    undone: bool,
}

impl UndoEntry {
    pub fn is_undone(&self) -> bool {
        self.undone
    }

    /// Replays the action once. A second call returns
    /// [`RollbackError::AlreadyUndone`] without touching the filesystem; a
    /// failed attempt may be retried.
    pub fn undo(&mut self, platform: &dyn Platform) -> Result<(), RollbackError> {
        if self.undone {
            return Err(RollbackError::AlreadyUndone {
                kind: self.action.kind(),
                path: self.action.path().to_path_buf(),
            });
        }

        executor::undo(&self.action, platform)?;
        self.undone = true;
        Ok(())
    }
}

/// Ordered record of inverse actions for one transaction.
#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the inverse of operation `index`. Entries must arrive in apply
    /// order.
    pub fn push(&mut self, index: usize, action: UndoAction) {
        debug_assert!(
            self.entries.last().is_none_or(|last| last.index < index),
            "undo log entries must be appended in apply order"
        );
        self.entries.push(UndoEntry {
            index,
            action,
            undone: false,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in replay (reverse-of-apply) order.
    pub fn replay_order(&mut self) -> impl Iterator<Item = &mut UndoEntry> {
        self.entries.iter_mut().rev()
    }
}
