use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Replace `target` by filling a sibling temporary file and renaming it over the original.
/// The temp file lives in the same directory so the rename never crosses filesystems.
/// If `fill` fails the temp file is removed and `target` is left untouched.
pub fn replace_with<F>(target: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let tmp = sibling_temp_file(target)?;
    fill(tmp.path())?;
    tmp.as_file().sync_all()?;
    persist(tmp, target)
}

/// Atomically replace `target` with `bytes`.
pub fn write_bytes(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = sibling_temp_file(target)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    persist(tmp, target)
}

/// Remove a file, treating "already gone" as success. Returns whether a file was deleted.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn sibling_temp_file(target: &Path) -> Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let tmp = tempfile::Builder::new()
        .prefix(".photomap-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    Ok(tmp)
}

fn persist(tmp: NamedTempFile, target: &Path) -> Result<()> {
    tmp.persist(target).map_err(|e| Error::Persist {
        path: target.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn test_write_bytes_creates_and_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested/out.json");

        write_bytes(&target, b"first").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"first");

        write_bytes(&target, b"second").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second");
        assert_eq!(leftover_temp_files(target.parent().unwrap()), 0);
    }

    #[test]
    fn test_failed_fill_leaves_original_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("cache.bin");
        fs::write(&target, b"original").unwrap();

        let result = replace_with(&target, |path| {
            fs::write(path, b"half written")?;
            Err(Error::UnknownSetting("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert_eq!(leftover_temp_files(tmp.path()), 0);
    }

    #[test]
    fn test_remove_if_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gone.txt");
        assert!(!remove_if_exists(&path).unwrap());

        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
