//! In-memory FileSystem for tests

use super::r#trait::{DirEntry, FileSystem, FileType};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Files keyed by path; directories are implied by their children
#[derive(Debug, Default)]
pub struct MockFileSystem {
    files: RwLock<BTreeMap<PathBuf, String>>,
    dirs: RwLock<BTreeMap<PathBuf, ()>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        if let Ok(mut files) = self.files.write() {
            files.insert(path, content.into());
        }
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        if let Ok(mut dirs) = self.dirs.write() {
            for ancestor in path.as_ref().ancestors() {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                dirs.insert(ancestor.to_path_buf(), ());
            }
        }
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        if let Ok(mut files) = self.files.write() {
            files.remove(path.as_ref());
        }
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs
            .read()
            .map(|d| d.contains_key(path))
            .unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files
            .read()
            .map(|f| f.contains_key(path))
            .unwrap_or(false)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.files.read().map_err(|_| anyhow!("lock poisoned"))?;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("Failed to read {}: not found", path.display()))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        if !self.is_dir(path) {
            return Err(anyhow!("Failed to list {}: not a directory", path.display()));
        }
        let files = self.files.read().map_err(|_| anyhow!("lock poisoned"))?;
        let dirs = self.dirs.read().map_err(|_| anyhow!("lock poisoned"))?;

        let children = files
            .keys()
            .map(|p| (p, FileType::File))
            .chain(dirs.keys().map(|p| (p, FileType::Directory)))
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, file_type)| DirEntry {
                path: p.clone(),
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                file_type,
            });
        let mut entries: Vec<DirEntry> = children.collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parent_dirs() {
        let fs = MockFileSystem::new();
        fs.add_file("/repo/src/coreason_api/main.py", "app = None");
        assert!(fs.is_dir(Path::new("/repo/src")));
        assert!(fs.is_dir(Path::new("/repo/src/coreason_api")));
        assert!(fs.exists(Path::new("/repo/src/coreason_api/main.py")));
        assert!(!fs.is_dir(Path::new("/repo/src/coreason_api/main.py")));
    }

    #[test]
    fn test_read_dir_lists_direct_children() {
        let fs = MockFileSystem::new();
        fs.add_file("/repo/pyproject.toml", "");
        fs.add_file("/repo/src/pkg/__init__.py", "");
        let names: Vec<_> = fs
            .read_dir(Path::new("/repo"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["pyproject.toml", "src"]);
    }

    #[test]
    fn test_remove_file() {
        let fs = MockFileSystem::new();
        fs.add_file("/repo/LICENSE", "MIT");
        fs.remove("/repo/LICENSE");
        assert!(fs.read_to_string(Path::new("/repo/LICENSE")).is_err());
    }
}
