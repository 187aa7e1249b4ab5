//! Atomic file writes for generated files and exported research results.

use std::io;
use std::path::Path;

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write to a `.tmp` sibling, then rename over `path`.
///
/// Parent directories are created as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.txt");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(!dir.path().join("nested").join("out.txt.tmp").exists());
    }

    #[test]
    fn test_atomic_write_dotfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        atomic_write(&path, b"A=1\n").unwrap();
        atomic_write(&path, b"A=2\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=2\n");
    }

    #[test]
    fn test_atomic_write_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.json");
        atomic_write_json(&path, &serde_json::json!({"answer": "42"})).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["answer"], "42");
    }
}
