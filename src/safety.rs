//! Safety checks for the files the binaries write.
//!
//! Result and stats files sit next to the snapshots they were built from;
//! these checks stop a typo from overwriting an input.

use anyhow::{bail, Result};
use std::path::Path;

/// Validates that an output path is safe to overwrite.
///
/// Checks:
/// - Output must have a `.json` extension
/// - Output cannot be any of the input files
/// - Output cannot live inside the snapshot directory
pub fn validate_output_path(output: &Path, inputs: &[&Path], snapshot_dir: Option<&Path>) -> Result<()> {
    let is_json = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if !is_json {
        bail!(
            "Safety check failed: output file '{}' must end in .json",
            output.display()
        );
    }

    let resolved = resolve(output);
    for input in inputs {
        if resolved == resolve(input) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as input '{}'",
                output.display(),
                input.display()
            );
        }
    }

    if let Some(dir) = snapshot_dir {
        let dir = resolve(dir);
        if resolved.parent().is_some_and(|parent| parent == dir.as_path()) {
            bail!(
                "Safety check failed: output '{}' would be read as a snapshot from '{}'",
                output.display(),
                dir.display()
            );
        }
    }

    Ok(())
}

/// Canonical form when the path exists, otherwise the path joined onto its
/// canonicalized parent.
fn resolve(path: &Path) -> std::path::PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        (_, Some(name)) => std::env::current_dir()
            .map(|cwd| cwd.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_output() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = dir.path().join("snapshots");
        std::fs::create_dir(&snapshots).unwrap();
        let request = dir.path().join("request.json");
        std::fs::write(&request, "{}").unwrap();

        let output = dir.path().join("chart-result.json");
        assert!(validate_output_path(&output, &[request.as_path()], Some(snapshots.as_path())).is_ok());
    }

    #[test]
    fn test_non_json_rejected() {
        let result = validate_output_path(Path::new("/tmp/result.sqlite3"), &[], None);
        assert!(result.unwrap_err().to_string().contains("must end in .json"));
    }

    #[test]
    fn test_output_equals_input() {
        let dir = tempfile::tempdir().unwrap();
        let request = dir.path().join("request.json");
        std::fs::write(&request, "{}").unwrap();

        // Same file through a different spelling
        let output = dir.path().join(".").join("request.json");
        let result = validate_output_path(&output, &[request.as_path()], None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as input"));
    }

    #[test]
    fn test_output_inside_snapshot_dir_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("melon_realtime.json");
        let result = validate_output_path(&output, &[], Some(dir.path()));
        assert!(result.unwrap_err().to_string().contains("snapshot"));
    }
}
