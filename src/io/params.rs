//! Parameter persistence file: `n v1 ... vn`, whitespace separated.
//!
//! The presence of this file means "reuse these parameters"; its absence means
//! "calibrate, then write it".

use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::camera::CalibrationError;

/// Loads a parameter vector of exactly `expected` values.
///
/// # Errors
///
/// * [`CalibrationError::PersistenceFailure`] if the file cannot be read, is
///   malformed, or holds a different number of values.
pub fn load_params(path: &Path, expected: usize) -> Result<Vec<f64>, CalibrationError> {
    let fail = |message: String| {
        CalibrationError::PersistenceFailure(format!("'{}': {message}", path.display()))
    };
    let contents = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let mut tokens = contents.split_whitespace();

    let count_token = tokens
        .next()
        .ok_or_else(|| fail("file is empty".to_string()))?;
    let count: usize = count_token
        .parse()
        .map_err(|_| fail(format!("invalid value count '{count_token}'")))?;
    if count != expected {
        return Err(fail(format!(
            "holds {count} parameters, the model needs {expected}"
        )));
    }

    let values = tokens
        .map(|token| match token.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(fail(format!("invalid parameter value '{token}'"))),
        })
        .collect::<Result<Vec<f64>, _>>()?;
    if values.len() != count {
        return Err(fail(format!(
            "declares {count} parameters but contains {}",
            values.len()
        )));
    }
    Ok(values)
}

/// Writes `values`, replacing any previous file only once the new content is
/// fully on disk.
///
/// # Errors
///
/// * [`CalibrationError::PersistenceFailure`] if the file cannot be written. The
///   previous file, if any, is left untouched.
pub fn save_params(path: &Path, values: &[f64]) -> Result<(), CalibrationError> {
    let fail = |e: std::io::Error| {
        CalibrationError::PersistenceFailure(format!("cannot write '{}': {e}", path.display()))
    };
    let staging = staging_path(path);

    let mut contents = values.len().to_string();
    for value in values {
        // Debug formatting keeps enough digits to round-trip.
        contents.push_str(&format!(" {value:?}"));
    }
    contents.push('\n');

    let written = fs::File::create(&staging).and_then(|mut file| {
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&staging, path)) {
        let _ = fs::remove_file(&staging);
        return Err(fail(e));
    }
    info!("Saved {} parameters to {}", values.len(), path.display());
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("field.params");
        let values = [1.891078, 9.28431, 0.0, -0.1 / 3.0];
        save_params(&path, &values).unwrap();
        assert_eq!(load_params(&path, 4).unwrap(), values.to_vec());
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_wrong_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p");
        fs::write(&path, "3 1 2 3").unwrap();
        assert!(matches!(
            load_params(&path, 8),
            Err(CalibrationError::PersistenceFailure(_))
        ));
        fs::write(&path, "3 1 2").unwrap();
        assert!(load_params(&path, 3).is_err());
        fs::write(&path, "2 1 x").unwrap();
        assert!(load_params(&path, 2).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_params(&dir.path().join("absent"), 1),
            Err(CalibrationError::PersistenceFailure(_))
        ));
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p");
        save_params(&path, &[1.0, 2.0]).unwrap();

        // A directory at the staging path makes the write fail.
        fs::create_dir(staging_path(&path)).unwrap();
        assert!(matches!(
            save_params(&path, &[3.0, 4.0]),
            Err(CalibrationError::PersistenceFailure(_))
        ));
        assert_eq!(load_params(&path, 2).unwrap(), vec![1.0, 2.0]);
    }
}
