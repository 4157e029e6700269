//! Validation functions for configuration values.
//!
//! Structural checks only. Whether directories exist and are writable is
//! decided at run time by the preflight stage.

use crate::backup::redacted::RedactedString;
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::{Path, PathBuf};

pub static MIN_PASSPHRASE_LEN: usize = 8;

pub fn validate_file_name_component<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) || name.contains(char::is_whitespace) {
        return Err(ValidationError::new("InvalidFileNameComponent").with_message(
            format!(
                "{:?} cannot be used in a file name, try sanitizing like {:?}",
                name,
                sanitize(name).replace(char::is_whitespace, "_")
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_absolute_path<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    if !path.is_absolute() {
        return Err(ValidationError::new("InvalidPath")
            .with_message(format!("{:?} must be an absolute path", path).into()));
    }

    Ok(())
}

pub fn validate_absolute_paths(paths: &[PathBuf]) -> Result<(), ValidationError> {
    paths.iter().try_for_each(validate_absolute_path)
}

pub fn validate_passphrase(passphrase: &RedactedString) -> Result<(), ValidationError> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(ValidationError::new("WeakPassphrase").with_message(
            format!("passphrase must be at least {MIN_PASSPHRASE_LEN} characters").into(),
        ));
    }

    Ok(())
}

pub fn validate_program_name<S: AsRef<str>>(program: S) -> Result<(), ValidationError> {
    let program = program.as_ref();
    if program.trim().is_empty() {
        return Err(ValidationError::new("InvalidProgram")
            .with_message("program name must not be empty".into()));
    }

    Ok(())
}
