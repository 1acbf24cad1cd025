//! Validation functions for configuration values.
//!
//! Provides custom validation functions for directories, cron expressions,
//! file name components and external program names.

use chrono::Utc;
use sanitize_filename::{is_sanitized, sanitize};
use validator::{Validate, ValidationError};

use std::path::Path;

pub fn validate_valid_file_name_part<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidFileNamePart")
            .with_message("File name part must not be empty".into()));
    }

    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidFileNamePart").with_message(
            format!(
                "Invalid file name {:?}, try sanitizing like {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access directory {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Utc::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

pub fn validate_program<P: AsRef<Path>>(program: P) -> Result<(), ValidationError> {
    if program.as_ref().as_os_str().is_empty() {
        return Err(ValidationError::new("InvalidProgram")
            .with_message("program must not be empty".into()));
    }

    Ok(())
}

/// Runs the `Validate` impl of a config section and folds its errors into
/// one field error, for sections whose `Validate` is hand written.
pub fn validate_section<T: Validate>(section: &T) -> Result<(), ValidationError> {
    section.validate().map_err(|e| {
        ValidationError::new("InvalidSection").with_message(e.to_string().into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_file_name_part() {
        assert!(validate_valid_file_name_part("web-01").is_ok());
        assert!(validate_valid_file_name_part("").is_err());
        assert!(validate_valid_file_name_part("../etc").is_err());
        assert!(validate_valid_file_name_part("a/b").is_err());
    }

    #[test]
    fn test_validate_dir_exist() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_dir_exist(temp_dir.path()).is_ok());
        assert!(validate_dir_exist(temp_dir.path().join("missing")).is_err());

        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_dir_exist(&file).is_err());
    }

    #[test]
    fn test_validate_dir_exist_or_created_creates() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b/c");
        assert!(validate_dir_exist_or_created(&nested).is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_validate_cron_str() {
        assert!(validate_cron_str("0 2 * * *").is_ok());
        assert!(validate_cron_str("not a cron").is_err());
    }

    #[test]
    fn test_validate_section() {
        use crate::backup::retention::RetentionConfig;
        assert!(validate_section(&RetentionConfig::new(2)).is_ok());
        let error = validate_section(&RetentionConfig::new(0)).unwrap_err();
        assert!(error.to_string().contains("count"));
    }

    #[test]
    fn test_validate_program() {
        assert!(validate_program("virsh").is_ok());
        assert!(validate_program("").is_err());
    }
}
