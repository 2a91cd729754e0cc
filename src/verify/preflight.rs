//! Pre-flight checks performed before a transaction takes any lock.
//!
//! Structural checks always run. In strict mode the whole batch is also
//! simulated against an overlay of the real namespace, so an operation's
//! existence expectations are checked against what the earlier operations
//! in the same batch will have done (`move a b` followed by `move b c` is
//! valid even though `b` does not exist yet).

use crate::error::ValidationError;
use crate::fs::executor::{Namespace, check_preconditions, check_structure};
use crate::fs::operation::{Action, NewEntry, Operation};
use crate::fs::platform::{EntryKind, Platform};

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Simulated state of one path.
#[derive(Debug, Clone)]
enum Entry {
    Absent,
    File,
    /// Created by this batch, so it has no children on disk.
    NewDir,
    /// Moved or copied here; the content is whatever is at the alias target.
    Alias(PathBuf),
}

/// The real namespace with the batch's effects layered on top.
struct Overlay<'a> {
    platform: &'a dyn Platform,
    entries: HashMap<PathBuf, Entry>,
}

impl<'a> Overlay<'a> {
    fn new(platform: &'a dyn Platform) -> Self {
        Self {
            platform,
            entries: HashMap::new(),
        }
    }

    /// Entry recorded for `path` itself or the closest recorded ancestor.
    fn closest(&self, path: &Path) -> Option<(&Path, &Entry)> {
        path.ancestors().find_map(|ancestor| {
            self.entries
                .get_key_value(ancestor)
                .map(|(k, v)| (k.as_path(), v))
        })
    }

    fn set(&mut self, path: &Path, entry: Entry) {
        // Anything recorded below a replaced path is stale.
        self.entries.retain(|p, _| !p.starts_with(path) || p == path);
        self.entries.insert(path.to_path_buf(), entry);
    }

    /// What an alias at `path` should point to: the real location of the
    /// content currently visible at `path`.
    fn origin(&self, path: &Path) -> Entry {
        match self.closest(path) {
            Some((at, Entry::Alias(target))) => Entry::Alias(rebase(target, at, path)),
            Some((at, Entry::File)) if at == path => Entry::File,
            Some((at, Entry::NewDir)) if at == path => Entry::NewDir,
            _ => Entry::Alias(path.to_path_buf()),
        }
    }

    /// Entries recorded strictly below `path`, keyed by their remainder.
    fn below(&self, path: &Path) -> Vec<(PathBuf, Entry)> {
        self.entries
            .iter()
            .filter_map(|(p, entry)| match p.strip_prefix(path) {
                Ok(rest) if !rest.as_os_str().is_empty() => {
                    Some((rest.to_path_buf(), entry.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Replaces `to` with the content visible at `from`, including whatever
    /// the batch already did inside it.
    fn graft(&mut self, from: &Path, to: &Path) -> Vec<(PathBuf, Entry)> {
        let origin = self.origin(from);
        let children = self.below(from);
        self.set(to, origin);
        children
    }

    fn record(&mut self, action: &Action) {
        match action {
            Action::Create { path, entry } => {
                let entry = match entry {
                    NewEntry::File(_) => Entry::File,
                    NewEntry::Dir => Entry::NewDir,
                };
                self.set(path, entry);
            }
            Action::Write { path, .. } => self.set(path, Entry::File),
            Action::Delete { path } => self.set(path, Entry::Absent),
            Action::Move { from, to } => {
                let children = self.graft(from, to);
                self.set(from, Entry::Absent);
                self.entries
                    .extend(children.into_iter().map(|(rest, e)| (to.join(rest), e)));
            }
            Action::Copy { from, to } => {
                let children = self.graft(from, to);
                self.entries
                    .extend(children.into_iter().map(|(rest, e)| (to.join(rest), e)));
            }
            Action::Chmod { .. } => {}
        }
    }
}

impl Namespace for Overlay<'_> {
    fn probe(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        match self.closest(path) {
            None => Ok(self.platform.stat(path)?.map(|s| s.kind)),
            Some((at, entry)) => {
                let exact = at == path;
                match entry {
                    Entry::Absent => Ok(None),
                    Entry::File if exact => Ok(Some(EntryKind::File)),
                    Entry::NewDir if exact => Ok(Some(EntryKind::Dir)),
                    Entry::File | Entry::NewDir => Ok(None),
                    Entry::Alias(target) => {
                        let real = rebase(target, at, path);
                        Ok(self.platform.stat(&real)?.map(|s| s.kind))
                    }
                }
            }
        }
    }
}

/// Maps `path` (at or below `at`) onto the same position below `target`.
fn rebase(target: &Path, at: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(at) {
        Ok(rest) if !rest.as_os_str().is_empty() => target.join(rest),
        _ => target.to_path_buf(),
    }
}

/// Structural checks that need no filesystem access.
pub fn check_batch_structure(operations: &[Operation]) -> Result<(), ValidationError> {
    if operations.is_empty() {
        return Err(ValidationError::Empty);
    }

    for op in operations {
        check_structure(&op.action).map_err(|e| precondition(op, e))?;
    }
    Ok(())
}

/// Simulates the batch in order and fails on the first operation whose
/// preconditions would not hold when its turn comes.
pub fn simulate(operations: &[Operation], platform: &dyn Platform) -> Result<(), ValidationError> {
    let mut overlay = Overlay::new(platform);

    for op in operations {
        check_preconditions(&op.action, &overlay).map_err(|e| precondition(op, e))?;
        overlay.record(&op.action);
        log::debug!("Pre-flight ok: #{} {}", op.index, op.kind());
    }

    Ok(())
}

fn precondition(op: &Operation, e: io::Error) -> ValidationError {
    ValidationError::Precondition {
        index: op.index,
        kind: op.kind(),
        path: op.action.path().to_path_buf(),
        reason: e.to_string(),
    }
}
