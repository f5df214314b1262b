//! Backing store abstraction for the portal filesystem.
//!
//! On the device the partition is mounted through the ESP-IDF VFS, after
//! which plain `std::fs` works against the mount point, so [`DirStorage`]
//! serves both the target and the host. [`MemStorage`] backs host tests.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{PortalError, Result};

/// A file visible to the `/listfiles` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

/// Mountable flat file store holding the config document, the factory-reset
/// marker and the served UI assets.
///
/// `format` wipes every file; callers decide between formatting and deleting
/// just the config document on factory reset.
pub trait StorageBackend: Send {
    fn mount(&mut self) -> Result<()>;
    fn is_mounted(&self) -> bool;
    fn format(&mut self) -> Result<()>;
    fn exists(&self, name: &str) -> bool;
    /// `Ok(None)` when the file is absent.
    fn read(&self, name: &str) -> Result<Option<String>>;
    fn write(&mut self, name: &str, contents: &str) -> Result<()>;
    /// No-op if the file is absent.
    fn remove(&mut self, name: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<FileEntry>>;
}

/// Directory-backed store over `std::fs`.
pub struct DirStorage {
    root: PathBuf,
    mounted: bool,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: false,
        }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }
}

impl StorageBackend for DirStorage {
    fn mount(&mut self) -> Result<()> {
        if self.mounted {
            return Ok(());
        }
        if !self.root.is_dir() {
            fs::create_dir_all(&self.root)
                .map_err(|e| PortalError::StorageMount(format!("{}: {e}", self.root.display())))?;
        }
        let count = fs::read_dir(&self.root)
            .map_err(|e| PortalError::StorageMount(format!("{}: {e}", self.root.display())))?
            .count();
        log::info!("Mounted {} ({} file(s))", self.root.display(), count);
        self.mounted = true;
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn format(&mut self) -> Result<()> {
        log::warn!("Formatting {}", self.root.display());
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_of(name)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, name: &str, contents: &str) -> Result<()> {
        Ok(fs::write(self.path_of(name), contents)?)
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<FileEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                out.push(FileEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: entry.metadata()?.len(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

/// In-memory store for host tests.
#[derive(Default)]
pub struct MemStorage {
    files: BTreeMap<String, String>,
    mounted: bool,
    /// When set, `mount` fails. Lets tests exercise the fatal path.
    pub fail_mount: bool,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemStorage {
    fn mount(&mut self) -> Result<()> {
        if self.fail_mount {
            return Err(PortalError::StorageMount("mem".to_string()));
        }
        self.mounted = true;
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn format(&mut self) -> Result<()> {
        self.files.clear();
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name.trim_start_matches('/'))
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        Ok(self.files.get(name.trim_start_matches('/')).cloned())
    }

    fn write(&mut self, name: &str, contents: &str) -> Result<()> {
        self.files
            .insert(name.trim_start_matches('/').to_string(), contents.to_string());
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        self.files.remove(name.trim_start_matches('/'));
        Ok(())
    }

    fn list(&self) -> Result<Vec<FileEntry>> {
        Ok(self
            .files
            .iter()
            .map(|(name, contents)| FileEntry {
                name: name.clone(),
                size: contents.len() as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStorage::new(dir.path());
        store.mount().unwrap();

        assert!(!store.exists("config.json"));
        store.write("config.json", "{}").unwrap();
        assert!(store.exists("config.json"));
        assert_eq!(store.read("config.json").unwrap().unwrap(), "{}");

        // Leading slashes are accepted; "/config.json" and "config.json"
        // name the same file.
        assert_eq!(store.read("/config.json").unwrap().unwrap(), "{}");

        let files = store.list().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "config.json");
        assert_eq!(files[0].size, 2);

        store.remove("config.json").unwrap();
        assert!(!store.exists("config.json"));
        // Removing again is a no-op.
        store.remove("config.json").unwrap();
    }

    #[test]
    fn test_dir_storage_format_clears_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStorage::new(dir.path());
        store.mount().unwrap();
        store.write("a.txt", "a").unwrap();
        store.write("b.txt", "b").unwrap();
        store.format().unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_mem_storage_fail_mount() {
        let mut store = MemStorage::new();
        store.fail_mount = true;
        assert!(matches!(
            store.mount(),
            Err(PortalError::StorageMount(_))
        ));
        assert!(!store.is_mounted());
    }
}
