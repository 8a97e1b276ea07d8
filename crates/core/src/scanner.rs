use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::folder_cache::CACHE_FILE_NAME;

/// File extensions (lowercase) treated as candidate photos.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "tif", "tiff", "heic", "heif", "png", "webp", "dng",
];

/// Name of the per-root metadata directory holding the combined dataset.
pub const META_DIR_NAME: &str = ".photomap";

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Hidden directory below the walk root. Both directory walks skip these.
pub(crate) fn is_hidden_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && is_hidden(entry.file_name())
}

/// Candidate images directly inside `folder` (non-recursive), sorted by path.
/// Hidden files are skipped, which also excludes the folder cache and its temp files.
/// Names that are not valid UTF-8 cannot round-trip through the folder cache and are skipped.
pub fn list_images(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(Error::FolderNotFound(folder.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(folder)?.filter_map(|entry| entry.ok()) {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        if is_hidden(&name) {
            continue;
        }
        let path = entry.path();
        if !is_supported_image(&path) {
            continue;
        }
        if name.to_str().is_none() {
            tracing::warn!(path = %path.display(), "skipping photo whose name is not valid UTF-8");
            continue;
        }
        images.push(path);
    }

    images.sort();
    Ok(images)
}

/// Nearest directory, `folder` itself included, that already holds a `.photomap`
/// metadata directory. This is the photo root an earlier scan or analysis used.
pub fn find_root(folder: &Path) -> Option<PathBuf> {
    let folder = folder.canonicalize().ok()?;
    folder
        .ancestors()
        .find(|dir| dir.join(META_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

/// Walk `root` and return every directory (root included) that directly contains
/// candidate images but has no folder cache yet. Hidden directories are not entered.
pub fn find_unanalyzed_folders(root: &Path) -> Result<Vec<PathBuf>> {
    let mut folders = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let dir = entry.path();
        if dir.join(CACHE_FILE_NAME).exists() {
            continue;
        }
        match list_images(dir) {
            Ok(images) if !images.is_empty() => folders.push(dir.to_path_buf()),
            Ok(_) => {}
            Err(err) => tracing::warn!(folder = %dir.display(), error = %err, "cannot list folder"),
        }
    }

    folders.sort();
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_supported_image() {
        assert!(is_supported_image(Path::new("a.jpg")));
        assert!(is_supported_image(Path::new("a.JPEG")));
        assert!(is_supported_image(Path::new("dir/b.HeIc")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("no_extension")));
    }

    #[test]
    fn test_list_images_non_recursive_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("b.jpg"), b"b").unwrap();
        fs::write(dir.join("a.TIF"), b"a").unwrap();
        fs::write(dir.join("readme.md"), b"x").unwrap();
        fs::write(dir.join(".hidden.jpg"), b"x").unwrap();
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/c.jpg"), b"c").unwrap();

        let images = list_images(dir).unwrap();
        let names: Vec<String> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.TIF", "b.jpg"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_images_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("ok.jpg"), b"a").unwrap();
        let odd = dir.join(OsStr::from_bytes(b"caf\xe9.jpg"));
        if fs::write(&odd, b"b").is_err() {
            // Filesystem refuses such names; nothing to skip.
            return;
        }

        let images = list_images(dir).unwrap();
        assert_eq!(images, vec![dir.join("ok.jpg")]);
    }

    #[test]
    fn test_list_images_missing_folder() {
        let err = list_images(Path::new("/nonexistent/folder")).unwrap_err();
        assert!(matches!(err, Error::FolderNotFound(_)));
    }

    #[test]
    fn test_find_root_walks_up_to_meta_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let nested = root.join("2023/italy");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_root(&nested), None);

        fs::create_dir_all(root.join(META_DIR_NAME)).unwrap();
        assert_eq!(find_root(&nested), Some(root.clone()));
        assert_eq!(find_root(&root), Some(root.clone()));
        assert_eq!(find_root(&root.join("missing")), None);
    }

    #[test]
    fn test_find_unanalyzed_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("2023/italy")).unwrap();
        fs::create_dir_all(root.join("2024")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join(".photomap")).unwrap();

        fs::write(root.join("2023/italy/a.jpg"), b"a").unwrap();
        fs::write(root.join("2024/b.jpg"), b"b").unwrap();
        fs::write(root.join("2024").join(CACHE_FILE_NAME), b"").unwrap();
        fs::write(root.join(".photomap/c.jpg"), b"c").unwrap();
        fs::create_dir_all(root.join(".trash")).unwrap();
        fs::write(root.join(".trash/d.jpg"), b"d").unwrap();

        let folders = find_unanalyzed_folders(root).unwrap();
        assert_eq!(folders, vec![root.join("2023/italy")]);
    }
}
