//! Blob storage for generated glossary artifacts.
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

/// Where generated artifacts live. Locations are flat names chosen by the
/// cache, never paths supplied by a caller.
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, location: &str) -> io::Result<bool>;

    fn write(&self, location: &str, bytes: &[u8]) -> io::Result<()>;

    fn read(&self, location: &str) -> io::Result<Vec<u8>>;

    /// Remove an artifact. Returns `false` if it was already gone.
    fn delete(&self, location: &str) -> io::Result<bool>;
}

/// Artifacts as files in one directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Use `root` as the artifact directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `location` inside the root. Anything but a plain file name
    /// is rejected, so no location can reach outside the directory.
    pub fn path_of(&self, location: &str) -> io::Result<PathBuf> {
        let mut components = Path::new(location).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None)
                if name == location && !location.contains(['/', '\\']) =>
            {
                Ok(self.root.join(name))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid artifact location: {location:?}"),
            )),
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, location: &str) -> io::Result<bool> {
        self.path_of(location)?.try_exists()
    }

    fn write(&self, location: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_of(location)?;
        // Write-then-rename so a reader never sees a half-written glossary
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        debug!("Wrote artifact {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    fn read(&self, location: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.path_of(location)?)
    }

    fn delete(&self, location: &str) -> io::Result<bool> {
        match std::fs::remove_file(self.path_of(location)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> io::Result<usize> {
        Ok(self.blobs.read().map_err(|_| poisoned())?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned() -> io::Error {
    io::Error::other("artifact store lock poisoned")
}

impl ArtifactStore for MemoryArtifactStore {
    fn exists(&self, location: &str) -> io::Result<bool> {
        Ok(self.blobs.read().map_err(|_| poisoned())?.contains_key(location))
    }

    fn write(&self, location: &str, bytes: &[u8]) -> io::Result<()> {
        self.blobs
            .write()
            .map_err(|_| poisoned())?
            .insert(location.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, location: &str) -> io::Result<Vec<u8>> {
        self.blobs
            .read()
            .map_err(|_| poisoned())?
            .get(location)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, location.to_string()))
    }

    fn delete(&self, location: &str) -> io::Result<bool> {
        Ok(self
            .blobs
            .write()
            .map_err(|_| poisoned())?
            .remove(location)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn ArtifactStore) {
        assert!(!store.exists("en-km-general-abc.tsv").unwrap());
        store.write("en-km-general-abc.tsv", b"hem\tx\n").unwrap();
        assert!(store.exists("en-km-general-abc.tsv").unwrap());
        assert_eq!(store.read("en-km-general-abc.tsv").unwrap(), b"hem\tx\n");

        assert!(store.delete("en-km-general-abc.tsv").unwrap());
        assert!(!store.delete("en-km-general-abc.tsv").unwrap());
        assert_eq!(
            store.read("en-km-general-abc.tsv").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_fs_store() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(temp.path().join("glossaries")).unwrap();
        exercise(&store);
        assert!(store.root().is_dir());
    }

    #[test]
    fn test_fs_store_rejects_locations_outside_root() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(temp.path().join("glossaries")).unwrap();

        for location in ["../escaped.tsv", "nested/a.tsv", "..", ".", "", "/tmp/a.tsv"] {
            assert_eq!(
                store.write(location, b"x").unwrap_err().kind(),
                io::ErrorKind::InvalidInput,
                "{location:?} should be rejected"
            );
            assert!(store.delete(location).is_err());
        }
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
        assert!(store.path_of("en-km-general-abc.tsv").is_ok());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryArtifactStore::new();
        exercise(&store);
        assert!(store.is_empty().unwrap());
    }
}
