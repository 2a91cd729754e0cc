//! Path-level locking across concurrent transactions.
//!
//! A lock is keyed by canonical absolute path and held by at most one
//! transaction. Two paths conflict when they are equal or one is an ancestor
//! of the other, so a transaction deleting `a/` and one writing `a/x` are
//! serialized.
//!
//! ## Deadlock avoidance
//!
//! Every `acquire` call sorts its paths and takes them in that order. If any
//! path cannot be taken before the deadline, everything this call already
//! took is released and [`TxnError::LockTimeout`] is returned: a failed
//! acquisition never leaves locks behind.

use crate::error::{Result, TxnError};

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identifier of the transaction holding a lock.
pub type Owner = Uuid;

#[derive(Debug, Default)]
pub struct PathLockManager {
    held: Mutex<HashMap<PathBuf, Owner>>,
    released: Condvar,
}

impl PathLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires every path in `paths` for `owner`, waiting at most `timeout`
    /// in total.
    pub fn acquire<I>(self: &Arc<Self>, owner: Owner, paths: I, timeout: Duration) -> Result<LockSet>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let ordered = lock_order(paths);
        let deadline = Instant::now() + timeout;
        let mut taken: Vec<PathBuf> = Vec::with_capacity(ordered.len());

        let mut held = self.held.lock();
        for path in &ordered {
            loop {
                let blocker = conflicting_owner(&held, path, owner);
                let Some(blocker) = blocker else {
                    break;
                };

                log::debug!(
                    "Transaction {} waiting on {} (held by {})",
                    owner,
                    path.display(),
                    blocker
                );

                if self.released.wait_until(&mut held, deadline).timed_out()
                    && conflicting_owner(&held, path, owner).is_some()
                {
                    for path in &taken {
                        held.remove(path);
                    }
                    drop(held);
                    self.released.notify_all();

                    log::warn!(
                        "Transaction {} timed out waiting for {}",
                        owner,
                        path.display()
                    );
                    return Err(TxnError::LockTimeout {
                        paths: ordered,
                        waited: timeout,
                    });
                }
            }

            held.insert(path.clone(), owner);
            taken.push(path.clone());
        }
        drop(held);

        log::debug!("Transaction {} holds {} lock(s)", owner, taken.len());

        Ok(LockSet {
            manager: Arc::clone(self),
            owner,
            paths: taken,
        })
    }

    /// Releases a held set. Equivalent to dropping it.
    pub fn release(&self, set: LockSet) {
        drop(set);
    }

    /// The transaction currently holding exactly `path`, if any.
    pub fn holder(&self, path: &Path) -> Option<Owner> {
        self.held.lock().get(path).copied()
    }

    /// Number of paths currently locked.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn release_paths(&self, owner: Owner, paths: &[PathBuf]) {
        let mut held = self.held.lock();
        for path in paths {
            if held.get(path) == Some(&owner) {
                held.remove(path);
            }
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Sorted, deduplicated paths with descendants of other requested paths
/// dropped (the ancestor's lock already covers them).
pub fn lock_order<I>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let sorted: BTreeSet<PathBuf> = paths.into_iter().collect();
    let mut ordered: Vec<PathBuf> = Vec::with_capacity(sorted.len());

    for path in sorted {
        // Component-wise ordering puts an ancestor directly before its subtree.
        if ordered.last().is_some_and(|prev| path.starts_with(prev)) {
            continue;
        }
        ordered.push(path);
    }

    ordered
}

fn conflicting_owner(held: &HashMap<PathBuf, Owner>, path: &Path, owner: Owner) -> Option<Owner> {
    held.iter()
        .find(|(locked, holder)| {
            **holder != owner && (locked.starts_with(path) || path.starts_with(locked))
        })
        .map(|(_, holder)| *holder)
}

/// Locks held by one transaction. Released on [`LockSet::release`] or drop.
#[must_use = "Locks are released as soon as the LockSet is dropped"]
#[derive(Debug)]
pub struct LockSet {
    manager: Arc<PathLockManager>,
    owner: Owner,
    paths: Vec<PathBuf>,
}

impl LockSet {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        if !self.paths.is_empty() {
            log::debug!(
                "Transaction {} releasing {} lock(s)",
                self.owner,
                self.paths.len()
            );
            self.manager.release_paths(self.owner, &self.paths);
        }
    }
}
