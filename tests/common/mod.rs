//! Shared fixtures for fstxn integration tests.
//!
//! `FaultyFs` wraps the host filesystem and fails chosen primitives on
//! chosen paths, so undo failures and mid-run errors are deterministic.

#![allow(unused)]

use assert_cmd::cargo::cargo_bin_cmd;
use fstxn::config::EngineConfig;
use fstxn::fs::{
    CacheInvalidator, EntryStat, HostFs, OperationMonitor, OperationRecord, Platform,
    TransactionManager,
};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// A temporary directory and its canonical path.
pub fn workspace() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().canonicalize().unwrap();
    (temp, root)
}

pub fn manager(root: &Path) -> TransactionManager {
    TransactionManager::new(EngineConfig::default().with_base_dir(root))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Write,
    Rename,
    RemoveFile,
    SetMode,
}

/// Host filesystem with injectable failures and an optional write delay.
///
/// `Rename` faults match the destination path; the others match the path
/// being written, removed or changed.
#[derive(Default)]
pub struct FaultyFs {
    faults: Mutex<HashSet<(Primitive, PathBuf)>>,
    write_delay: Option<Duration>,
}

impl FaultyFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, primitive: Primitive, path: impl Into<PathBuf>) -> Self {
        self.faults.lock().unwrap().insert((primitive, path.into()));
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    fn check(&self, primitive: Primitive, path: &Path) -> io::Result<()> {
        if self
            .faults
            .lock()
            .unwrap()
            .contains(&(primitive, path.to_path_buf()))
        {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected {:?} failure", primitive),
            ));
        }
        Ok(())
    }
}

impl Platform for FaultyFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        HostFs.read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(delay) = self.write_delay {
            thread::sleep(delay);
        }
        self.check(Primitive::Write, path)?;
        HostFs.write(path, contents)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(Primitive::Rename, to)?;
        HostFs.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.check(Primitive::RemoveFile, path)?;
        HostFs.remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        HostFs.remove_dir(path)
    }

    fn stat(&self, path: &Path) -> io::Result<Option<EntryStat>> {
        HostFs.stat(path)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.check(Primitive::SetMode, path)?;
        HostFs.set_mode(path, mode)
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        HostFs.mkdir(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        HostFs.list_dir(path)
    }

    fn same_filesystem(&self, from: &Path, to: &Path) -> bool {
        HostFs.same_filesystem(from, to)
    }
}

#[derive(Default)]
pub struct RecordingCache(pub Mutex<Vec<PathBuf>>);

impl CacheInvalidator for RecordingCache {
    fn invalidate(&self, path: &Path) {
        self.0.lock().unwrap().push(path.to_path_buf());
    }
}

impl RecordingCache {
    pub fn paths(&self) -> Vec<PathBuf> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct RecordingMonitor(pub Mutex<Vec<OperationRecord>>);

impl OperationMonitor for RecordingMonitor {
    fn log_operation(&self, record: &OperationRecord) {
        self.0.lock().unwrap().push(record.clone());
    }
}

impl RecordingMonitor {
    pub fn records(&self) -> Vec<OperationRecord> {
        self.0.lock().unwrap().clone()
    }
}

/// Writes `json` to `ops.json` in `root` and runs `fstxn <subcommand>` on it.
pub fn run_fstxn(
    root: &Path,
    subcommand: &str,
    json: &str,
    extra_args: &[&str],
) -> assert_cmd::assert::Assert {
    let batch = root.join("ops.json");
    fs::write(&batch, json).unwrap();

    let mut cmd = cargo_bin_cmd!("fstxn");
    cmd.arg(subcommand)
        .arg(&batch)
        .arg("--base-dir")
        .arg(root)
        .args(extra_args)
        .env("NO_COLOR", "1")
        .current_dir(root);

    cmd.assert()
}
