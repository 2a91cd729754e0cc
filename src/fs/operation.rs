//! Operation descriptors and their resolved, per-transaction form.
//!
//! Callers describe work with [`OperationSpec`] (the JSON-facing shape).
//! On submission every spec is resolved into an [`Operation`]: paths become
//! canonical absolute paths and the kind-specific payload is pulled into an
//! [`Action`] variant, so executors dispatch on a closed enum.

use crate::error::ValidationError;
use crate::verify::rules::{parse_mode, resolve_path, validate_mode};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The six kinds of mutation the engine knows how to apply and undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Write,
    Create,
    Delete,
    Move,
    Copy,
    Chmod,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Write => "write",
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::Move => "move",
            OperationKind::Copy => "copy",
            OperationKind::Chmod => "chmod",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disposition of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Pending,
    Applied,
    Failed,
    Undone,
    UndoFailed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Pending => "pending",
            Outcome::Applied => "applied",
            Outcome::Failed => "failed",
            Outcome::Undone => "undone",
            Outcome::UndoFailed => "undo-failed",
        };
        f.write_str(s)
    }
}

/// Caller-facing description of one operation.
///
/// `content` is the payload for `write`/`create`, `permissions` for `chmod`,
/// and `destination` the second path for `move`/`copy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub kind: OperationKind,
    pub path: PathBuf,
    #[serde(
        default,
        alias = "destinationPath",
        skip_serializing_if = "Option::is_none"
    )]
    pub destination: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_permissions",
        skip_serializing_if = "Option::is_none"
    )]
    pub permissions: Option<u32>,
    /// For `create`: make a directory instead of a file.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub directory: bool,
}

impl OperationSpec {
    fn bare(kind: OperationKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            destination: None,
            content: None,
            permissions: None,
            directory: false,
        }
    }

    pub fn write(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::bare(OperationKind::Write, path)
        }
    }

    pub fn create(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::bare(OperationKind::Create, path)
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>) -> Self {
        Self {
            directory: true,
            ..Self::bare(OperationKind::Create, path)
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::bare(OperationKind::Delete, path)
    }

    pub fn r#move(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(to.into()),
            ..Self::bare(OperationKind::Move, from)
        }
    }

    pub fn copy(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(to.into()),
            ..Self::bare(OperationKind::Copy, from)
        }
    }

    pub fn chmod(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            permissions: Some(mode),
            ..Self::bare(OperationKind::Chmod, path)
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMode {
    Bits(u32),
    Octal(String),
}

/// Accepts either numeric bits (`420`) or an octal string (`"644"`, `"0o755"`).
fn deserialize_permissions<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawMode> = Option::deserialize(deserializer)?;
    raw.map(|mode| match mode {
        RawMode::Bits(bits) => validate_mode(bits).map(|_| bits),
        RawMode::Octal(s) => parse_mode(&s),
    })
    .transpose()
    .map_err(serde::de::Error::custom)
}

/// Kind-specific payload of a resolved operation. All paths are canonical
/// and absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Write { path: PathBuf, content: Vec<u8> },
    Create { path: PathBuf, entry: NewEntry },
    Delete { path: PathBuf },
    Move { from: PathBuf, to: PathBuf },
    Copy { from: PathBuf, to: PathBuf },
    Chmod { path: PathBuf, mode: u32 },
}

/// What a `create` brings into existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewEntry {
    File(Vec<u8>),
    Dir,
}

impl Action {
    pub fn kind(&self) -> OperationKind {
        match self {
            Action::Write { .. } => OperationKind::Write,
            Action::Create { .. } => OperationKind::Create,
            Action::Delete { .. } => OperationKind::Delete,
            Action::Move { .. } => OperationKind::Move,
            Action::Copy { .. } => OperationKind::Copy,
            Action::Chmod { .. } => OperationKind::Chmod,
        }
    }

    /// The primary path (the source for move/copy).
    pub fn path(&self) -> &Path {
        match self {
            Action::Write { path, .. }
            | Action::Create { path, .. }
            | Action::Delete { path }
            | Action::Chmod { path, .. } => path,
            Action::Move { from, .. } | Action::Copy { from, .. } => from,
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        match self {
            Action::Move { to, .. } | Action::Copy { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Every path this action reads or mutates.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path()).chain(self.destination())
    }
}

/// One operation inside a transaction.
///
/// Only the executors and the rollback executor change `outcome`.
#[derive(Debug, Clone)]
pub struct Operation {
    pub index: usize,
    pub action: Action,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub undo_error: Option<String>,
}

impl Operation {
    /// Resolves a descriptor against `base`, checking that the payload the
    /// kind needs is present and every path is canonicalizable.
    pub fn resolve(
        index: usize,
        spec: &OperationSpec,
        base: &Path,
    ) -> std::result::Result<Self, ValidationError> {
        let kind = spec.kind;
        let resolve = |raw: &Path| {
            resolve_path(raw, base).map_err(|reason| ValidationError::InvalidPath {
                index,
                path: raw.display().to_string(),
                reason,
            })
        };
        let missing = |field| ValidationError::MissingField { index, kind, field };

        let path = resolve(&spec.path)?;
        let destination = || -> std::result::Result<PathBuf, ValidationError> {
            let raw = spec.destination.as_deref().ok_or_else(|| missing("destination"))?;
            resolve(raw)
        };

        let action = match kind {
            OperationKind::Write => Action::Write {
                path,
                content: spec
                    .content
                    .clone()
                    .ok_or_else(|| missing("content"))?
                    .into_bytes(),
            },
            OperationKind::Create => {
                let entry = if spec.directory {
                    NewEntry::Dir
                } else {
                    NewEntry::File(spec.content.clone().unwrap_or_default().into_bytes())
                };
                Action::Create { path, entry }
            }
            OperationKind::Delete => Action::Delete { path },
            OperationKind::Move => Action::Move {
                from: path,
                to: destination()?,
            },
            OperationKind::Copy => Action::Copy {
                from: path,
                to: destination()?,
            },
            OperationKind::Chmod => Action::Chmod {
                path,
                mode: spec.permissions.ok_or_else(|| missing("permissions"))?,
            },
        };

        Ok(Self::new(index, action))
    }

    pub fn new(index: usize, action: Action) -> Self {
        Self {
            index,
            action,
            outcome: Outcome::Pending,
            error: None,
            undo_error: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.action.kind()
    }
}
