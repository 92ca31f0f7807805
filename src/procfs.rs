//! Small helpers for reading `/proc` and `/sys` text files.
//!
//! Every Linux dependency takes a root directory (normally `/proc` or
//! `/sys`) so tests can point it at a temporary tree.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{PalError, Result};

/// Reads a whole file. A missing file maps to `PalError::NotFound`.
pub fn read_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| PalError::from_io_path(&path.display().to_string(), e))
}

/// Reads a file as owned lines.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(read_string(path)?.lines().map(str::to_string).collect())
}

/// Parses a whitespace-delimited token, naming `what` in the error.
pub fn parse_token<T: FromStr>(token: &str, what: &str) -> Result<T> {
    token.parse().map_err(|_| PalError::parse(what, token))
}

/// Finds `key` as the first token of a line and parses the second token,
/// e.g. `MemTotal:  16384 kB` or `pgpgin 1467244`.
pub fn find_value<T: FromStr>(lines: &[String], key: &str) -> Option<T> {
    lines.iter().find_map(|line| {
        let mut tokens = line.split_whitespace();
        if tokens.next()? != key {
            return None;
        }
        tokens.next()?.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_missing_file_is_not_found() {
        let dir = tempdir().expect("Failed to create temp dir");
        let err = read_string(&dir.path().join("nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_find_value() {
        let lines = vec![
            "MemTotal:       16384 kB".to_string(),
            "MemFree:         2048 kB".to_string(),
            "pgpgin 42".to_string(),
        ];
        assert_eq!(find_value::<u64>(&lines, "MemFree:"), Some(2048));
        assert_eq!(find_value::<u64>(&lines, "pgpgin"), Some(42));
        assert_eq!(find_value::<u64>(&lines, "SwapTotal:"), None);
    }

    #[test]
    fn test_parse_token_error_names_field() {
        let err = parse_token::<u64>("abc", "utime").unwrap_err();
        assert!(err.to_string().contains("utime"));
    }
}
