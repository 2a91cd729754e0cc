//! Raw single-call filesystem primitives.
//!
//! The engine never talks to `std::fs` directly; every read and mutation goes
//! through a [`Platform`] so that each primitive is one call the host
//! documents as atomic at its own granularity (a single `rename`, a single
//! `remove_file`, ...). [`HostFs`] is the real implementation.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;

/// What kind of entry sits at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, sockets, devices. Not handled by the executors.
    Other,
}

/// Result of a `stat` on an existing entry. Symlinks are not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub kind: EntryKind,
    pub mode: u32,
}

/// Host filesystem primitives.
pub trait Platform: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
    /// Returns `Ok(None)` when nothing exists at `path`.
    fn stat(&self, path: &Path) -> io::Result<Option<EntryStat>>;
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// Creates a single directory (parent must exist).
    fn mkdir(&self, path: &Path) -> io::Result<()>;
    /// Entry names of a directory, sorted.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;
    /// Whether `to` (or its parent) lives on the same device as `from`, i.e.
    /// whether a single `rename` can move between them.
    fn same_filesystem(&self, from: &Path, to: &Path) -> bool;
}

/// [`Platform`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl Platform for HostFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn stat(&self, path: &Path) -> io::Result<Option<EntryStat>> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let file_type = metadata.file_type();
        let kind = if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::Other
        };

        Ok(Some(EntryStat {
            kind,
            mode: mode_of(&metadata),
        }))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut perms = fs::metadata(path)?.permissions();
        apply_mode(&mut perms, mode);
        fs::set_permissions(path, perms)
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let mut names = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn same_filesystem(&self, from: &Path, to: &Path) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let to_dir = to.parent().unwrap_or(to);
            match (fs::symlink_metadata(from), fs::metadata(to_dir)) {
                (Ok(a), Ok(b)) => a.dev() == b.dev(),
                _ => true,
            }
        }

        #[cfg(not(unix))]
        {
            let from_str = from.to_string_lossy();
            let to_str = to.to_string_lossy();
            from_str.chars().next() == to_str.chars().next()
        }
    }
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn apply_mode(perms: &mut fs::Permissions, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(mode);
}

#[cfg(not(unix))]
fn apply_mode(perms: &mut fs::Permissions, mode: u32) {
    // Only the owner-write bit maps onto the read-only flag.
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(mode & 0o200 == 0);
}
