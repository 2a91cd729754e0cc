//! Path rules and pre-flight checks for operation batches.

pub mod preflight;
pub mod rules;

pub use preflight::{check_batch_structure, simulate};
pub use rules::{parse_mode, resolve_path, validate_mode};
